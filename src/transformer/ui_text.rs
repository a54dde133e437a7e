//! Line-oriented UI text protocol (inbound only).
//!
//! Each delta is one `kind:JSON\n` line:
//!
//! | Kind | Payload |
//! |------|---------|
//! | `0` | text fragment (JSON string) |
//! | `g` | reasoning fragment (JSON string) |
//! | `b` | tool call start `{toolCallId, toolName}` |
//! | `c` | tool argument delta `{toolCallId, argsTextDelta}` |
//! | `9` | complete tool call `{toolCallId, toolName, args}` |
//! | `e` | finish `{finishReason, usage, isContinued}` |
//!
//! Requests use the OpenAI chat-completions body.

use crate::stream::{BoxChunkStream, ConvertStream, Converter};
use crate::transformer::openai::OpenAiInbound;
use crate::transformer::{parse_body, validate_request, AggregateMeta, ApiFormat, Inbound};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::tool::parse_arguments;
use crate::types::{Request, Response, StreamEvent, ToolCall, Usage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

pub const KIND_TEXT: &str = "0";
pub const KIND_REASONING: &str = "g";
pub const KIND_TOOL_START: &str = "b";
pub const KIND_TOOL_DELTA: &str = "c";
pub const KIND_TOOL_CALL: &str = "9";
pub const KIND_FINISH: &str = "e";

#[derive(Debug, Clone, Default)]
pub struct UiTextInbound;

impl UiTextInbound {
    pub fn new() -> Self {
        Self
    }
}

fn line(kind: &str, value: &Value) -> Result<StreamEvent> {
    StreamEvent::json(kind, value)
}

#[derive(Default)]
struct LineEncoder {
    /// (index, id, name, accumulated args) in first-seen order.
    calls: Vec<(Option<u32>, String, String, String)>,
    finish_reason: Option<String>,
    usage: Usage,
    finished: bool,
}

impl LineEncoder {
    fn call_position(&self, call: &ToolCall) -> Option<usize> {
        if !call.id.is_empty() {
            if let Some(pos) = self.calls.iter().position(|(_, id, _, _)| *id == call.id) {
                return Some(pos);
            }
        }
        match call.index {
            Some(index) => self.calls.iter().position(|(i, _, _, _)| *i == Some(index)),
            None if call.id.is_empty() => self.calls.len().checked_sub(1),
            None => None,
        }
    }

    fn flush_calls(&mut self, out: &mut Vec<StreamEvent>) -> Result<()> {
        for (_, id, name, args) in self.calls.drain(..) {
            out.push(line(
                KIND_TOOL_CALL,
                &json!({"toolCallId": id, "toolName": name, "args": parse_arguments(&args)}),
            )?);
        }
        Ok(())
    }
}

impl Converter<Response, StreamEvent> for LineEncoder {
    fn convert(&mut self, chunk: Response) -> Result<Vec<StreamEvent>> {
        let mut out = Vec::new();
        if chunk.is_done() || self.finished {
            return Ok(out);
        }
        if let Some(usage) = chunk.usage {
            self.usage = usage;
        }
        for choice in &chunk.choices {
            let Some(delta) = &choice.delta else { continue };
            if let Some(reasoning) = delta.reasoning_content.as_ref().filter(|s| !s.is_empty()) {
                out.push(line(KIND_REASONING, &json!(reasoning))?);
            }
            if let Some(text) = delta.content.as_ref().filter(|s| !s.is_empty()) {
                out.push(line(KIND_TEXT, &json!(text))?);
            }
            for call in &delta.tool_calls {
                let pos = match self.call_position(call) {
                    Some(pos) => pos,
                    None => {
                        self.calls.push((
                            call.index,
                            call.id.clone(),
                            call.function.name.clone(),
                            String::new(),
                        ));
                        out.push(line(
                            KIND_TOOL_START,
                            &json!({"toolCallId": call.id, "toolName": call.function.name}),
                        )?);
                        self.calls.len() - 1
                    }
                };
                let fragment = &call.function.arguments;
                if !fragment.is_empty() {
                    let entry = &mut self.calls[pos];
                    entry.3.push_str(fragment);
                    out.push(line(
                        KIND_TOOL_DELTA,
                        &json!({"toolCallId": entry.1, "argsTextDelta": fragment}),
                    )?);
                }
            }
            if choice.finish_reason.is_some() && self.finish_reason.is_none() {
                self.finish_reason = choice.finish_reason.clone();
                self.flush_calls(&mut out)?;
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        let mut out = Vec::new();
        if self.finished {
            return Ok(out);
        }
        self.finished = true;
        self.flush_calls(&mut out)?;
        out.push(line(
            KIND_FINISH,
            &json!({
                "finishReason": self.finish_reason.clone().unwrap_or_else(|| "stop".to_string()),
                "usage": {
                    "promptTokens": self.usage.prompt_tokens,
                    "completionTokens": self.usage.completion_tokens,
                },
                "isContinued": false,
            }),
        )?);
        Ok(out)
    }
}

#[async_trait]
impl Inbound for UiTextInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::UiText
    }

    async fn transform_request(&self, request: &HttpRequest) -> Result<Request> {
        let parsed: Request = parse_body(&request.body)?;
        validate_request(&parsed)?;
        Ok(parsed)
    }

    async fn transform_response(&self, response: &Response) -> Result<HttpResponse> {
        HttpResponse::json(200, response)
    }

    async fn transform_stream(
        &self,
        stream: BoxChunkStream<Response>,
    ) -> Result<BoxChunkStream<StreamEvent>> {
        Ok(ConvertStream::boxed(stream, LineEncoder::default()))
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, AggregateMeta)> {
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = Vec::new();
        let mut meta = AggregateMeta::default();

        for event in chunks {
            let value: Value = serde_json::from_slice(&event.data)?;
            match event.event_type.as_str() {
                KIND_TEXT => content.push_str(value.as_str().unwrap_or_default()),
                KIND_REASONING => reasoning.push_str(value.as_str().unwrap_or_default()),
                KIND_TOOL_CALL => tool_calls.push(json!({
                    "id": value["toolCallId"],
                    "type": "function",
                    "function": {"name": value["toolName"], "arguments": value["args"].to_string()},
                })),
                KIND_FINISH => {
                    meta.finish_reason = value["finishReason"].as_str().map(str::to_string);
                    meta.usage = Some(Usage::new(
                        value.pointer("/usage/promptTokens").and_then(Value::as_u64).unwrap_or(0),
                        value
                            .pointer("/usage/completionTokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0),
                    ));
                }
                _ => {}
            }
        }

        let mut body = json!({"role": "assistant", "content": content});
        if !reasoning.is_empty() {
            body["reasoning_content"] = json!(reasoning);
        }
        if !tool_calls.is_empty() {
            body["tool_calls"] = Value::Array(tool_calls);
        }
        Ok((Bytes::from(serde_json::to_vec(&body)?), meta))
    }

    async fn transform_error(&self, error: &Error) -> HttpResponse {
        OpenAiInbound::new().transform_error(error).await
    }

    fn stream_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Content-Type".to_string(), "text/plain; charset=utf-8".to_string()),
            ("Cache-Control".to_string(), "no-cache".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
        ]
    }

    fn encode_event(&self, event: &StreamEvent) -> Bytes {
        let mut out = Vec::with_capacity(event.data.len() + 3);
        out.extend_from_slice(event.event_type.as_bytes());
        out.push(b':');
        out.extend_from_slice(&event.data);
        out.push(b'\n');
        Bytes::from(out)
    }
}
