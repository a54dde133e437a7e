//! UI chat request (messages with typed parts) → unified request.
//!
//! Assistant messages may span several steps separated by `step-start`
//! parts; each step becomes one assistant message followed by the tool
//! results produced in that step.

use crate::error::ErrorContext;
use crate::types::{ContentPart, Message, MessageContent, Request, Role, Tool, ToolCall};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct UiRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<UiMessage>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, alias = "maxTokens")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: String,
    /// Plain-content messages are accepted as well as part lists.
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl UiMessage {
    fn parts(&self) -> Vec<Value> {
        if !self.parts.is_empty() {
            return self.parts.clone();
        }
        match &self.content {
            Some(Value::String(text)) => vec![serde_json::json!({"type": "text", "text": text})],
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }
}

fn part_type(part: &Value) -> &str {
    part.get("type").and_then(Value::as_str).unwrap_or_default()
}

fn str_field<'a>(part: &'a Value, key: &str) -> &'a str {
    part.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn text_of(parts: &[Value]) -> String {
    parts
        .iter()
        .filter(|p| part_type(p) == "text")
        .map(|p| str_field(p, "text"))
        .collect::<Vec<_>>()
        .join("")
}

fn user_content(parts: &[Value]) -> MessageContent {
    let mut out = Vec::new();
    for part in parts {
        match part_type(part) {
            "text" => out.push(ContentPart::text(str_field(part, "text"))),
            "file" if str_field(part, "mediaType").starts_with("image/") => {
                out.push(ContentPart::image_url(str_field(part, "url")))
            }
            _ => {}
        }
    }
    match out.as_slice() {
        [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
        [] => MessageContent::default(),
        _ => MessageContent::Parts(out),
    }
}

/// Tool part: `tool-<name>` or `dynamic-tool` with an explicit `toolName`.
fn tool_name(part: &Value) -> Option<String> {
    let kind = part_type(part);
    if kind == "dynamic-tool" {
        return Some(str_field(part, "toolName").to_string());
    }
    kind.strip_prefix("tool-").map(str::to_string)
}

fn output_text(part: &Value) -> Option<String> {
    match str_field(part, "state") {
        "output-available" => Some(match part.get("output") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }),
        "output-error" => Some(str_field(part, "errorText").to_string()),
        _ => None,
    }
}

#[derive(Default)]
struct Step {
    text: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    results: Vec<Message>,
}

impl Step {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.reasoning.is_empty() && self.tool_calls.is_empty()
    }

    fn flush_into(self, messages: &mut Vec<Message>) {
        if self.is_empty() {
            return;
        }
        let mut message = Message::assistant(self.text).with_tool_calls(self.tool_calls);
        if !self.reasoning.is_empty() {
            message.reasoning_content = Some(self.reasoning);
        }
        messages.push(message);
        messages.extend(self.results);
    }
}

fn assistant_messages(parts: &[Value], messages: &mut Vec<Message>) {
    let mut step = Step::default();
    for part in parts {
        match part_type(part) {
            "step-start" => {
                std::mem::take(&mut step).flush_into(messages);
            }
            "text" => step.text.push_str(str_field(part, "text")),
            "reasoning" => step.reasoning.push_str(str_field(part, "text")),
            _ => {
                let Some(name) = tool_name(part) else { continue };
                if str_field(part, "state") == "input-streaming" {
                    continue;
                }
                let id = str_field(part, "toolCallId").to_string();
                let input = part.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                step.tool_calls.push(ToolCall::new(id.clone(), name, input.to_string()));
                if let Some(output) = output_text(part) {
                    step.results.push(Message::tool_result(id, output));
                }
            }
        }
    }
    step.flush_into(messages);
}

pub fn from_ui_request(request: UiRequest) -> Result<Request> {
    let mut messages = Vec::new();
    for (i, message) in request.messages.iter().enumerate() {
        let parts = message.parts();
        match message.role.as_str() {
            "system" => messages.push(Message::system(text_of(&parts))),
            "user" => messages.push(Message::new(Role::User, user_content(&parts))),
            "assistant" => assistant_messages(&parts, &mut messages),
            other => {
                return Err(Error::validation_with_context(
                    format!("unsupported role: {other}"),
                    ErrorContext::new().with_field_path(format!("messages[{i}].role")),
                ))
            }
        }
    }

    let mut unified = Request::new(request.model, messages);
    unified.tools = request.tools;
    unified.temperature = request.temperature;
    unified.max_tokens = request.max_tokens;
    // The data stream protocol is inherently streamed.
    unified.stream = Some(request.stream.unwrap_or(true));
    Ok(unified)
}
