//! Anthropic Messages dialect.
//!
//! Key differences from the unified (OpenAI-shaped) model:
//! - System prompts are a top-level `system` field, not messages.
//! - Content is a list of typed blocks; tool calls are `tool_use` blocks and
//!   tool results are `tool_result` blocks inside a *user* message.
//! - `max_tokens` is mandatory.
//! - Streams are SSE frames named after the event `type`
//!   (`message_start`, `content_block_delta`, ...).

mod inbound;
pub(crate) mod outbound;
pub mod stream;

pub use inbound::AnthropicInbound;
pub use outbound::AnthropicOutbound;

use crate::error::ErrorContext;
use crate::types::response::OBJECT_COMPLETION;
use crate::types::{
    Choice, ContentPart, Message, MessageContent, Request, Response, Role, Tool, ToolCall, Usage,
};
use crate::{Error, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<String>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    fn text(&self) -> String {
        match self {
            SystemPrompt::Text(s) => s.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl AnthropicContent {
    fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            AnthropicContent::Text(text) => vec![ContentBlock::Text { text }],
            AnthropicContent::Blocks(blocks) => blocks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "message_type")]
    pub kind: String,
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

fn message_type() -> String {
    "message".to_string()
}

fn assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

impl AnthropicUsage {
    pub fn to_usage(self) -> Usage {
        let cached = self.cache_creation_input_tokens.unwrap_or(0)
            + self.cache_read_input_tokens.unwrap_or(0);
        Usage::new(self.input_tokens + cached, self.output_tokens)
    }

    pub fn from_usage(usage: &Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            ..Default::default()
        }
    }
}

/// Anthropic `stop_reason` → unified `finish_reason`.
pub fn finish_reason_from_stop(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" | "stop_sequence" | "pause_turn" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "refusal" => "content_filter",
        other => other,
    }
    .to_string()
}

/// Unified `finish_reason` → Anthropic `stop_reason`.
pub fn stop_reason_from_finish(finish_reason: &str) -> String {
    match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "refusal",
        other => other,
    }
    .to_string()
}

/// HTTP status conventionally paired with an Anthropic error `type`.
pub fn status_for_error_type(error_type: &str) -> u16 {
    match error_type {
        "invalid_request_error" => 400,
        "authentication_error" => 401,
        "permission_error" => 403,
        "not_found_error" => 404,
        "request_too_large" => 413,
        "rate_limit_error" => 429,
        "overloaded_error" => 529,
        _ => 500,
    }
}

/// Build an [`Error::Api`] from a `{"type":"error","error":{...}}` payload.
pub(crate) fn api_error_from_value(status: Option<u16>, value: &Value) -> Option<Error> {
    let error = value.get("error")?;
    let error_type = error
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("api_error")
        .to_string();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(Error::Api {
        status: status.unwrap_or_else(|| status_for_error_type(&error_type)),
        code: None,
        error_type,
        message,
    })
}

/// Client-facing error body.
pub(crate) fn error_body(error: &Error) -> Value {
    let error_type = match error.status_code() {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        503 | 529 => "overloaded_error",
        _ => "api_error",
    };
    let error_type = match error {
        Error::Api { error_type, .. } if error_type.ends_with("_error") => error_type.as_str(),
        _ => error_type,
    };
    json!({
        "type": "error",
        "error": {"type": error_type, "message": error.client_message()},
    })
}

fn image_source(url: &str) -> ImageSource {
    // data:<media>;base64,<payload>
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(',') {
            let media_type = meta.trim_end_matches(";base64").to_string();
            return ImageSource {
                source_type: "base64".to_string(),
                media_type: Some(media_type),
                data: Some(data.to_string()),
                url: None,
            };
        }
    }
    ImageSource {
        source_type: "url".to_string(),
        media_type: None,
        data: None,
        url: Some(url.to_string()),
    }
}

fn image_url(source: &ImageSource) -> Option<String> {
    match source.source_type.as_str() {
        "base64" => {
            let data = source.data.as_deref()?;
            // Reject payloads that are not base64 rather than forwarding garbage.
            base64::engine::general_purpose::STANDARD.decode(data).ok()?;
            Some(format!(
                "data:{};base64,{}",
                source.media_type.as_deref().unwrap_or("image/png"),
                data
            ))
        }
        _ => source.url.clone(),
    }
}

fn user_blocks(content: &MessageContent) -> Vec<ContentBlock> {
    content
        .parts()
        .into_iter()
        .map(|part| match part {
            ContentPart::Text { text } => ContentBlock::Text { text },
            ContentPart::ImageUrl { image_url } => ContentBlock::Image {
                source: image_source(&image_url.url),
            },
        })
        .collect()
}

fn tool_choice_to_anthropic(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => Some(json!({"type": "auto"})),
            "none" => Some(json!({"type": "none"})),
            "required" => Some(json!({"type": "any"})),
            _ => None,
        },
        Value::Object(_) => {
            let name = choice.pointer("/function/name")?.as_str()?;
            Some(json!({"type": "tool", "name": name}))
        }
        _ => None,
    }
}

fn tool_choice_from_anthropic(choice: &Value) -> Option<Value> {
    match choice.get("type")?.as_str()? {
        "auto" => Some(json!("auto")),
        "none" => Some(json!("none")),
        "any" => Some(json!("required")),
        "tool" => {
            let name = choice.get("name")?.as_str()?;
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}

fn stop_sequences(stop: &Value) -> Option<Vec<String>> {
    match stop {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

/// Push a message, merging consecutive same-role messages (the API requires
/// alternating turns, and several tool results form one user turn).
fn push_merged(messages: &mut Vec<AnthropicMessage>, role: &str, blocks: Vec<ContentBlock>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut() {
        if last.role == role {
            if let AnthropicContent::Blocks(existing) = &mut last.content {
                existing.extend(blocks);
                return;
            }
        }
    }
    messages.push(AnthropicMessage {
        role: role.to_string(),
        content: AnthropicContent::Blocks(blocks),
    });
}

/// Unified request → Anthropic Messages request.
pub fn to_messages_request(request: &Request) -> Result<MessagesRequest> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in &request.messages {
        match message.role {
            Role::System => system_parts.push(message.text()),
            Role::User => push_merged(&mut messages, "user", user_blocks(&message.content)),
            Role::Tool => {
                let tool_use_id = message.tool_call_id.clone().ok_or_else(|| {
                    Error::validation_with_context(
                        "tool message without tool_call_id",
                        ErrorContext::new().with_field_path("messages[].tool_call_id"),
                    )
                })?;
                push_merged(
                    &mut messages,
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id,
                        content: Some(Value::String(message.text())),
                        is_error: None,
                    }],
                );
            }
            Role::Assistant => {
                let mut blocks = user_blocks(&message.content);
                for call in &message.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input: match call.parsed_arguments() {
                            Value::Object(map) => Value::Object(map),
                            _ => json!({}),
                        },
                    });
                }
                push_merged(&mut messages, "assistant", blocks);
            }
        }
    }

    let system_parts: Vec<String> = system_parts.into_iter().filter(|s| !s.is_empty()).collect();

    Ok(MessagesRequest {
        model: request.model.clone(),
        messages,
        system: (!system_parts.is_empty()).then(|| SystemPrompt::Text(system_parts.join("\n\n"))),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.as_ref().and_then(stop_sequences),
        stream: request.stream,
        tools: request
            .tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect(),
        tool_choice: request.tool_choice.as_ref().and_then(tool_choice_to_anthropic),
        metadata: request.user.as_ref().map(|u| json!({"user_id": u})),
        anthropic_version: None,
    })
}

fn tool_result_text(content: Option<Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
    }
}

/// Anthropic Messages request → unified request.
pub fn from_messages_request(request: MessagesRequest) -> Result<Request> {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        let text = system.text();
        if !text.is_empty() {
            messages.push(Message::system(text));
        }
    }

    for (i, message) in request.messages.into_iter().enumerate() {
        let role = message.role.clone();
        let blocks = message.content.into_blocks();
        match role.as_str() {
            "user" => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(ContentPart::text(text)),
                        ContentBlock::Image { source } => {
                            if let Some(url) = image_url(&source) {
                                parts.push(ContentPart::image_url(url));
                            }
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => messages.push(Message::tool_result(
                            tool_use_id,
                            tool_result_text(content),
                        )),
                        _ => {}
                    }
                }
                if !parts.is_empty() {
                    let content = match parts.as_slice() {
                        [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
                        _ => MessageContent::Parts(parts),
                    };
                    messages.push(Message::new(Role::User, content));
                }
            }
            "assistant" => {
                let mut text = String::new();
                let mut reasoning = String::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(&t),
                        ContentBlock::Thinking { thinking, .. } => reasoning.push_str(&thinking),
                        ContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(ToolCall::new(id, name, input.to_string()))
                        }
                        _ => {}
                    }
                }
                let mut message = Message::assistant(text).with_tool_calls(tool_calls);
                if !reasoning.is_empty() {
                    message.reasoning_content = Some(reasoning);
                }
                messages.push(message);
            }
            other => {
                return Err(Error::validation_with_context(
                    format!("unsupported role: {other}"),
                    ErrorContext::new().with_field_path(format!("messages[{i}].role")),
                ))
            }
        }
    }

    let mut unified = Request::new(request.model, messages);
    unified.max_tokens = Some(request.max_tokens);
    unified.temperature = request.temperature;
    unified.top_p = request.top_p;
    unified.stream = request.stream;
    unified.stop = request
        .stop_sequences
        .map(|s| Value::Array(s.into_iter().map(Value::String).collect()));
    unified.tools = request
        .tools
        .into_iter()
        .map(|t| Tool::function(t.name, t.description, Some(t.input_schema)))
        .collect();
    unified.tool_choice = request.tool_choice.as_ref().and_then(tool_choice_from_anthropic);
    unified.user = request
        .metadata
        .as_ref()
        .and_then(|m| m.get("user_id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(unified)
}

/// Anthropic response → unified `chat.completion`.
pub fn from_messages_response(response: MessagesResponse) -> Response {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::Thinking { thinking, .. } => reasoning.push_str(&thinking),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input.to_string()))
            }
            _ => {}
        }
    }
    let mut message = Message::assistant(text).with_tool_calls(tool_calls);
    if !reasoning.is_empty() {
        message.reasoning_content = Some(reasoning);
    }

    Response {
        id: response.id,
        object: OBJECT_COMPLETION.to_string(),
        created: chrono::Utc::now().timestamp(),
        model: response.model,
        choices: vec![Choice {
            index: 0,
            message: Some(message),
            delta: None,
            finish_reason: response.stop_reason.as_deref().map(finish_reason_from_stop),
        }],
        usage: Some(response.usage.to_usage()),
    }
}

/// Unified response → Anthropic response.
pub fn to_messages_response(response: &Response) -> MessagesResponse {
    let mut content = Vec::new();
    let mut stop_reason = None;
    if let Some(choice) = response.choices.first() {
        if let Some(message) = &choice.message {
            if let Some(reasoning) = message.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
                content.push(ContentBlock::Thinking {
                    thinking: reasoning.clone(),
                    signature: None,
                });
            }
            let text = message.text();
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
            for call in &message.tool_calls {
                content.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input: call.parsed_arguments(),
                });
            }
        }
        stop_reason = choice.finish_reason.as_deref().map(stop_reason_from_finish);
    }

    MessagesResponse {
        id: response.id.clone(),
        kind: message_type(),
        role: assistant_role(),
        model: response.model.clone(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: response
            .usage
            .as_ref()
            .map(AnthropicUsage::from_usage)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoists_system_and_merges_tool_results() {
        let request = Request::new(
            "claude-3-opus",
            vec![
                Message::system("be brief"),
                Message::system("be kind"),
                Message::user("weather?"),
                Message::assistant("").with_tool_calls(vec![
                    ToolCall::new("t1", "weather", r#"{"city":"SF"}"#),
                    ToolCall::new("t2", "weather", r#"{"city":"LA"}"#),
                ]),
                Message::tool_result("t1", "sunny"),
                Message::tool_result("t2", "cloudy"),
            ],
        );
        let converted = to_messages_request(&request).unwrap();

        assert_eq!(
            converted.system,
            Some(SystemPrompt::Text("be brief\n\nbe kind".into()))
        );
        assert_eq!(converted.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(converted.messages.len(), 3);
        assert_eq!(converted.messages[2].role, "user");
        match &converted.messages[2].content {
            AnthropicContent::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_inbound_request_with_blocks() {
        let raw = json!({
            "model": "claude-3-haiku",
            "max_tokens": 100,
            "system": [{"type": "text", "text": "sys"}],
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "s"},
                    {"type": "tool_use", "id": "t1", "name": "f", "input": {"a": 1}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "ok"}]}
                ]}
            ],
            "tool_choice": {"type": "any"}
        });
        let request: MessagesRequest = serde_json::from_value(raw).unwrap();
        let unified = from_messages_request(request).unwrap();

        assert_eq!(unified.messages[0].role, Role::System);
        assert_eq!(unified.messages[2].reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(unified.messages[2].tool_calls[0].parsed_arguments(), json!({"a": 1}));
        assert_eq!(unified.messages[3].role, Role::Tool);
        assert_eq!(unified.messages[3].text(), "ok");
        assert_eq!(unified.tool_choice, Some(json!("required")));
        assert_eq!(unified.max_tokens, Some(100));
    }

    #[test]
    fn rejects_unknown_role() {
        let raw = json!({"model": "m", "messages": [{"role": "tool", "content": "x"}]});
        let request: MessagesRequest = serde_json::from_value(raw).unwrap();
        let err = from_messages_request(request).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn stop_reasons_map_both_ways() {
        assert_eq!(finish_reason_from_stop("end_turn"), "stop");
        assert_eq!(finish_reason_from_stop("max_tokens"), "length");
        assert_eq!(finish_reason_from_stop("tool_use"), "tool_calls");
        assert_eq!(finish_reason_from_stop("stop_sequence"), "stop");
        assert_eq!(stop_reason_from_finish("tool_calls"), "tool_use");
        assert_eq!(stop_reason_from_finish("length"), "max_tokens");
    }

    #[test]
    fn response_conversion_keeps_tool_use() {
        let raw = json!({
            "id": "msg_1", "type": "message", "role": "assistant", "model": "claude-3",
            "content": [{"type": "text", "text": "Let me check"},
                        {"type": "tool_use", "id": "t1", "name": "weather", "input": {"city": "SF"}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let response = from_messages_response(serde_json::from_value(raw).unwrap());
        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(response.usage.unwrap().total_tokens, 15);

        let back = to_messages_response(&response);
        assert_eq!(back.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(back.content.len(), 2);
    }
}
