use crate::types::response::OBJECT_COMPLETION;
use crate::types::{Choice, Message, MessageContent, Response, Role, ToolCall, Usage};

/// Folds streamed unified chunks back into one `chat.completion` response.
///
/// Tolerant by construction: tool-call fragments are matched by `index`, then
/// by id, then appended to the most recent call.
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    id: String,
    model: String,
    created: i64,
    content: String,
    reasoning: String,
    tool_calls: Vec<(Option<u32>, ToolCall)>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &Response) {
        if chunk.is_done() {
            return;
        }
        if self.id.is_empty() && !chunk.id.is_empty() {
            self.id = chunk.id.clone();
        }
        if self.model.is_empty() && !chunk.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if self.created == 0 {
            self.created = chunk.created;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for choice in &chunk.choices {
            if let Some(delta) = &choice.delta {
                if let Some(text) = &delta.content {
                    self.content.push_str(text);
                }
                if let Some(text) = &delta.reasoning_content {
                    self.reasoning.push_str(text);
                }
                for call in &delta.tool_calls {
                    self.on_tool_fragment(call);
                }
            }
            if let Some(message) = &choice.message {
                self.content.push_str(&message.content.text());
                if let Some(text) = &message.reasoning_content {
                    self.reasoning.push_str(text);
                }
                for call in &message.tool_calls {
                    self.tool_calls.push((call.index, call.clone()));
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason.clone();
            }
        }
    }

    fn on_tool_fragment(&mut self, fragment: &ToolCall) {
        let existing = match fragment.index {
            Some(index) => self.tool_calls.iter().position(|(i, _)| *i == Some(index)),
            None if !fragment.id.is_empty() => self
                .tool_calls
                .iter()
                .position(|(_, call)| call.id == fragment.id),
            None => self.tool_calls.len().checked_sub(1),
        };

        match existing {
            Some(pos) => {
                let call = &mut self.tool_calls[pos].1;
                if !fragment.id.is_empty() {
                    call.id = fragment.id.clone();
                }
                if !fragment.function.name.is_empty() {
                    call.function.name = fragment.function.name.clone();
                }
                call.function.arguments.push_str(&fragment.function.arguments);
            }
            None => {
                let mut call = fragment.clone();
                call.index = None;
                self.tool_calls.push((fragment.index, call));
            }
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn finish(self) -> Response {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .map(|(_, mut call)| {
                call.fill_empty_arguments();
                call
            })
            .collect();

        let mut message = Message::new(Role::Assistant, MessageContent::Text(self.content))
            .with_tool_calls(tool_calls);
        if !self.reasoning.is_empty() {
            message.reasoning_content = Some(self.reasoning);
        }

        Response {
            id: self.id,
            object: OBJECT_COMPLETION.to_string(),
            created: self.created,
            model: self.model,
            choices: vec![Choice {
                index: 0,
                message: Some(message),
                delta: None,
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
        }
    }

    pub fn aggregate<'a>(chunks: impl IntoIterator<Item = &'a Response>) -> Response {
        let mut aggregator = Self::new();
        for chunk in chunks {
            aggregator.push(chunk);
        }
        aggregator.finish()
    }
}
