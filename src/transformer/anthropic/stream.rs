//! Anthropic streaming events in both directions.
//!
//! [`StreamDecoder`] turns provider events into unified chunks;
//! [`StreamEncoder`] turns unified chunks into client events. Both track
//! content-block indexes since Anthropic addresses every delta by block.

use super::{
    api_error_from_value, finish_reason_from_stop, stop_reason_from_finish, AnthropicUsage,
    ContentBlock, MessagesResponse,
};
use crate::stream::Converter;
use crate::types::{Delta, Response, Role, StreamEvent, ToolCall, Usage};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

fn event_payload(event: &StreamEvent) -> Result<Option<Value>> {
    if event.is_done() || event.data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&event.data)?))
}

fn event_type(event: &StreamEvent, payload: &Value) -> String {
    payload
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| event.event_type.clone())
}

fn u64_at(value: &Value, pointer: &str) -> Option<u64> {
    value.pointer(pointer).and_then(Value::as_u64)
}

/// Provider events → unified chunks.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    id: String,
    model: String,
    input_tokens: u64,
    /// Anthropic block index → unified tool call index.
    tool_indexes: HashMap<u64, u32>,
    next_tool_index: u32,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk(&self) -> Response {
        Response::chunk(self.id.clone(), self.model.clone())
    }

    fn decode(&mut self, event: &StreamEvent) -> Result<Vec<Response>> {
        let Some(payload) = event_payload(event)? else {
            return Ok(Vec::new());
        };

        match event_type(event, &payload).as_str() {
            "message_start" => {
                let message = payload.get("message").cloned().unwrap_or_default();
                self.id = message
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.model = message
                    .get("model")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.input_tokens = u64_at(&message, "/usage/input_tokens").unwrap_or(0)
                    + u64_at(&message, "/usage/cache_read_input_tokens").unwrap_or(0)
                    + u64_at(&message, "/usage/cache_creation_input_tokens").unwrap_or(0);
                Ok(vec![self.chunk().with_delta(Delta {
                    role: Some(Role::Assistant),
                    content: Some(String::new()),
                    ..Default::default()
                })])
            }
            "content_block_start" => {
                let index = u64_at(&payload, "/index").unwrap_or(0);
                let block = payload.get("content_block").cloned().unwrap_or_default();
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        let tool_index = self.next_tool_index;
                        self.next_tool_index += 1;
                        self.tool_indexes.insert(index, tool_index);
                        let mut call = ToolCall::new(
                            block.get("id").and_then(Value::as_str).unwrap_or_default(),
                            block.get("name").and_then(Value::as_str).unwrap_or_default(),
                            "",
                        );
                        call.index = Some(tool_index);
                        Ok(vec![self.chunk().with_delta(Delta::tool_call(call))])
                    }
                    Some("text") => match block.get("text").and_then(Value::as_str) {
                        Some(text) if !text.is_empty() => {
                            Ok(vec![self.chunk().with_delta(Delta::text(text))])
                        }
                        _ => Ok(Vec::new()),
                    },
                    _ => Ok(Vec::new()),
                }
            }
            "content_block_delta" => {
                let index = u64_at(&payload, "/index").unwrap_or(0);
                let delta = payload.get("delta").cloned().unwrap_or_default();
                let text = |key: &str| {
                    delta
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                let out = match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => Delta::text(text("text")),
                    Some("thinking_delta") => Delta::reasoning(text("thinking")),
                    Some("input_json_delta") => {
                        let mut call = ToolCall::new("", "", text("partial_json"));
                        call.index = Some(self.tool_indexes.get(&index).copied().unwrap_or(0));
                        Delta::tool_call(call)
                    }
                    _ => return Ok(Vec::new()),
                };
                Ok(vec![self.chunk().with_delta(out)])
            }
            "message_delta" => {
                let mut chunk = self.chunk();
                if let Some(reason) = payload.pointer("/delta/stop_reason").and_then(Value::as_str)
                {
                    chunk = chunk.with_finish_reason(finish_reason_from_stop(reason));
                }
                if let Some(output) = u64_at(&payload, "/usage/output_tokens") {
                    let input = u64_at(&payload, "/usage/input_tokens").unwrap_or(self.input_tokens);
                    chunk.usage = Some(Usage::new(input, output));
                }
                Ok(vec![chunk])
            }
            "message_stop" => Ok(vec![Response::done()]),
            "error" => Err(api_error_from_value(None, &payload)
                .unwrap_or_else(|| Error::validation("malformed error event"))),
            // ping, content_block_stop, unknown future events
            _ => Ok(Vec::new()),
        }
    }
}

impl Converter<StreamEvent, Response> for StreamDecoder {
    fn convert(&mut self, event: StreamEvent) -> Result<Vec<Response>> {
        self.decode(&event)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OpenBlock {
    Text,
    Thinking,
    Tool(String),
}

/// Unified chunks → client events.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    started: bool,
    stopped: bool,
    next_index: u64,
    open: Option<OpenBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

impl StreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn event(name: &str, value: Value) -> Result<StreamEvent> {
        StreamEvent::json(name, &value)
    }

    fn close_block(&mut self, out: &mut Vec<StreamEvent>) -> Result<()> {
        if self.open.take().is_some() {
            out.push(Self::event(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": self.next_index}),
            )?);
            self.next_index += 1;
        }
        Ok(())
    }

    fn open_block(
        &mut self,
        kind: OpenBlock,
        content_block: Value,
        out: &mut Vec<StreamEvent>,
    ) -> Result<()> {
        if self.open.as_ref() == Some(&kind) {
            return Ok(());
        }
        self.close_block(out)?;
        out.push(Self::event(
            "content_block_start",
            json!({"type": "content_block_start", "index": self.next_index, "content_block": content_block}),
        )?);
        self.open = Some(kind);
        Ok(())
    }

    fn delta(&self, delta: Value) -> Result<StreamEvent> {
        Self::event(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": self.next_index, "delta": delta}),
        )
    }

    fn stop(&mut self, out: &mut Vec<StreamEvent>) -> Result<()> {
        if self.stopped || !self.started {
            return Ok(());
        }
        self.close_block(out)?;
        out.push(Self::event(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": self.stop_reason.clone().unwrap_or_else(|| "end_turn".to_string()), "stop_sequence": null},
                "usage": {"output_tokens": self.usage.completion_tokens},
            }),
        )?);
        out.push(Self::event("message_stop", json!({"type": "message_stop"}))?);
        self.stopped = true;
        Ok(())
    }

    fn encode(&mut self, chunk: &Response) -> Result<Vec<StreamEvent>> {
        let mut out = Vec::new();
        if self.stopped {
            return Ok(out);
        }
        if chunk.is_done() {
            self.stop(&mut out)?;
            return Ok(out);
        }
        if let Some(usage) = chunk.usage {
            self.usage = usage;
        }
        if !self.started {
            self.started = true;
            out.push(Self::event(
                "message_start",
                json!({
                    "type": "message_start",
                    "message": {
                        "id": chunk.id, "type": "message", "role": "assistant",
                        "model": chunk.model, "content": [],
                        "stop_reason": null, "stop_sequence": null,
                        "usage": {"input_tokens": self.usage.prompt_tokens, "output_tokens": 0},
                    },
                }),
            )?);
        }

        for choice in &chunk.choices {
            let Some(delta) = &choice.delta else { continue };

            if let Some(reasoning) = delta.reasoning_content.as_ref().filter(|s| !s.is_empty()) {
                self.open_block(
                    OpenBlock::Thinking,
                    json!({"type": "thinking", "thinking": ""}),
                    &mut out,
                )?;
                out.push(self.delta(json!({"type": "thinking_delta", "thinking": reasoning}))?);
            }
            if let Some(text) = delta.content.as_ref().filter(|s| !s.is_empty()) {
                self.open_block(OpenBlock::Text, json!({"type": "text", "text": ""}), &mut out)?;
                out.push(self.delta(json!({"type": "text_delta", "text": text}))?);
            }
            for call in &delta.tool_calls {
                let key = if call.id.is_empty() {
                    match &self.open {
                        Some(OpenBlock::Tool(id)) => id.clone(),
                        _ => format!("toolu_{}", call.index.unwrap_or(0)),
                    }
                } else {
                    call.id.clone()
                };
                self.open_block(
                    OpenBlock::Tool(key.clone()),
                    json!({"type": "tool_use", "id": key, "name": call.function.name, "input": {}}),
                    &mut out,
                )?;
                if !call.function.arguments.is_empty() {
                    out.push(self.delta(
                        json!({"type": "input_json_delta", "partial_json": call.function.arguments}),
                    )?);
                }
            }
            if let Some(reason) = &choice.finish_reason {
                self.stop_reason = Some(stop_reason_from_finish(reason));
                self.close_block(&mut out)?;
            }
        }
        Ok(out)
    }
}

impl Converter<Response, StreamEvent> for StreamEncoder {
    fn convert(&mut self, chunk: Response) -> Result<Vec<StreamEvent>> {
        self.encode(&chunk)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        let mut out = Vec::new();
        self.stop(&mut out)?;
        Ok(out)
    }
}

enum BlockBuilder {
    Text(String),
    Thinking(String, Option<String>),
    Tool {
        id: String,
        name: String,
        json: String,
    },
}

/// Fold Anthropic stream events into the equivalent non-streamed response.
pub fn aggregate_events(events: &[StreamEvent]) -> Result<MessagesResponse> {
    let mut response = MessagesResponse {
        id: String::new(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: String::new(),
        content: Vec::new(),
        stop_reason: None,
        stop_sequence: None,
        usage: AnthropicUsage::default(),
    };
    let mut blocks: BTreeMap<u64, BlockBuilder> = BTreeMap::new();

    for event in events {
        let Some(payload) = event_payload(event)? else {
            continue;
        };
        match event_type(event, &payload).as_str() {
            "message_start" => {
                if let Some(message) = payload.get("message") {
                    let usage = message.get("usage").cloned().unwrap_or_default();
                    response.id = message
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    response.model = message
                        .get("model")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    response.usage = serde_json::from_value(usage).unwrap_or_default();
                }
            }
            "content_block_start" => {
                let index = u64_at(&payload, "/index").unwrap_or(0);
                let block = payload.get("content_block").cloned().unwrap_or_default();
                let str_of = |key: &str| {
                    block
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                let builder = match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => BlockBuilder::Tool {
                        id: str_of("id"),
                        name: str_of("name"),
                        json: String::new(),
                    },
                    Some("thinking") => BlockBuilder::Thinking(str_of("thinking"), None),
                    _ => BlockBuilder::Text(str_of("text")),
                };
                blocks.insert(index, builder);
            }
            "content_block_delta" => {
                let index = u64_at(&payload, "/index").unwrap_or(0);
                let delta = payload.get("delta").cloned().unwrap_or_default();
                let fragment = |key: &str| delta.get(key).and_then(Value::as_str).unwrap_or_default();
                match blocks.get_mut(&index) {
                    Some(BlockBuilder::Text(text)) => text.push_str(fragment("text")),
                    Some(BlockBuilder::Thinking(text, signature)) => {
                        text.push_str(fragment("thinking"));
                        if let Some(sig) = delta.get("signature").and_then(Value::as_str) {
                            *signature = Some(sig.to_string());
                        }
                    }
                    Some(BlockBuilder::Tool { json, .. }) => json.push_str(fragment("partial_json")),
                    None => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = payload.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    response.stop_reason = Some(reason.to_string());
                }
                if let Some(output) = u64_at(&payload, "/usage/output_tokens") {
                    response.usage.output_tokens = output;
                }
                if let Some(input) = u64_at(&payload, "/usage/input_tokens") {
                    response.usage.input_tokens = input;
                }
            }
            "error" => {
                if let Some(err) = api_error_from_value(None, &payload) {
                    return Err(err);
                }
            }
            _ => {}
        }
    }

    response.content = blocks
        .into_values()
        .map(|builder| match builder {
            BlockBuilder::Text(text) => ContentBlock::Text { text },
            BlockBuilder::Thinking(thinking, signature) => {
                ContentBlock::Thinking { thinking, signature }
            }
            BlockBuilder::Tool { id, name, json } => ContentBlock::ToolUse {
                id,
                name,
                input: crate::types::tool::parse_arguments(&json),
            },
        })
        .collect();
    Ok(response)
}
