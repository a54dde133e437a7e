//! # UI Data Stream (v1)
//!
//! Rich web chat clients consume a strongly ordered event protocol: each SSE
//! frame is `data: <json>\n\n` with a `type` discriminator, and the stream ends
//! with `data: [DONE]`.
//!
//! - [`stream::DataStreamEncoder`]: unified deltas → events (forward)
//! - [`aggregate::aggregate_events`]: events → one message (backward)
//! - [`request::from_ui_request`]: typed-part UI request → unified request

pub mod aggregate;
pub mod request;
pub mod stream;

pub use request::{from_ui_request, UiRequest};
pub use stream::DataStreamEncoder;

use crate::stream::{BoxChunkStream, ConvertStream};
use crate::transformer::openai::OpenAiInbound;
use crate::transformer::{
    parse_body, sse_headers, validate_request, AggregateMeta, ApiFormat, Inbound,
};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const STREAM_MARKER_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const STREAM_MARKER_VERSION: &str = "v1";

/// One frame of the data-stream protocol.
///
/// `data-*` frames carry arbitrary application payloads and are not modelled
/// here; [`UiEvent::parse`] skips them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UiEvent {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    SourceDocument {
        source_id: String,
        media_type: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    File {
        url: String,
        media_type: String,
    },
    FinishStep,
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },
    Error {
        error_text: String,
    },
}

impl UiEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            UiEvent::Start { .. } => "start",
            UiEvent::StartStep => "start-step",
            UiEvent::TextStart { .. } => "text-start",
            UiEvent::TextDelta { .. } => "text-delta",
            UiEvent::TextEnd { .. } => "text-end",
            UiEvent::ReasoningStart { .. } => "reasoning-start",
            UiEvent::ReasoningDelta { .. } => "reasoning-delta",
            UiEvent::ReasoningEnd { .. } => "reasoning-end",
            UiEvent::ToolInputStart { .. } => "tool-input-start",
            UiEvent::ToolInputDelta { .. } => "tool-input-delta",
            UiEvent::ToolInputAvailable { .. } => "tool-input-available",
            UiEvent::SourceUrl { .. } => "source-url",
            UiEvent::SourceDocument { .. } => "source-document",
            UiEvent::File { .. } => "file",
            UiEvent::FinishStep => "finish-step",
            UiEvent::Finish { .. } => "finish",
            UiEvent::Error { .. } => "error",
        }
    }

    pub fn to_stream_event(&self) -> Result<StreamEvent> {
        Ok(StreamEvent::new("", serde_json::to_vec(self)?))
    }

    /// Parse one frame. `[DONE]` and `data-*` frames yield `None`.
    pub fn parse(event: &StreamEvent) -> Result<Option<UiEvent>> {
        if event.is_done() {
            return Ok(None);
        }
        let value: Value = serde_json::from_slice(&event.data)?;
        if value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| t.starts_with("data-"))
        {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

/// Serves web chat clients over the UI data-stream protocol.
#[derive(Debug, Clone, Default)]
pub struct DataStreamInbound;

impl DataStreamInbound {
    pub fn new() -> Self {
        Self
    }
}

/// Non-streamed reply in UI message shape.
fn ui_message(response: &Response) -> Value {
    let mut parts = Vec::new();
    if let Some(message) = response.choices.first().and_then(|c| c.message.as_ref()) {
        if let Some(reasoning) = message.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
            parts.push(json!({"type": "reasoning", "text": reasoning}));
        }
        let text = message.text();
        if !text.is_empty() {
            parts.push(json!({"type": "text", "text": text}));
        }
        for call in &message.tool_calls {
            parts.push(json!({
                "type": format!("tool-{}", call.function.name),
                "toolCallId": call.id,
                "state": "input-available",
                "input": call.parsed_arguments(),
            }));
        }
    }
    json!({"id": response.id, "role": "assistant", "parts": parts})
}

#[async_trait]
impl Inbound for DataStreamInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::UiDataStream
    }

    async fn transform_request(&self, request: &HttpRequest) -> Result<Request> {
        let parsed: UiRequest = parse_body(&request.body)?;
        let unified = from_ui_request(parsed)?;
        validate_request(&unified)?;
        Ok(unified)
    }

    async fn transform_response(&self, response: &Response) -> Result<HttpResponse> {
        HttpResponse::json(200, &ui_message(response))
    }

    async fn transform_stream(
        &self,
        stream: BoxChunkStream<Response>,
    ) -> Result<BoxChunkStream<StreamEvent>> {
        Ok(ConvertStream::boxed(stream, DataStreamEncoder::new()))
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, AggregateMeta)> {
        let (message, meta) = aggregate::aggregate_events(chunks)?;
        Ok((Bytes::from(serde_json::to_vec(&message)?), meta))
    }

    async fn transform_error(&self, error: &Error) -> HttpResponse {
        OpenAiInbound::new().transform_error(error).await
    }

    fn stream_headers(&self) -> Vec<(String, String)> {
        let mut headers = sse_headers();
        headers.push((
            STREAM_MARKER_HEADER.to_string(),
            STREAM_MARKER_VERSION.to_string(),
        ));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_kebab_types_and_camel_fields() {
        let event = UiEvent::ToolInputDelta {
            tool_call_id: "call_1".into(),
            input_text_delta: "{".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "tool-input-delta", "toolCallId": "call_1", "inputTextDelta": "{"})
        );
        assert_eq!(
            serde_json::to_value(UiEvent::StartStep).unwrap(),
            json!({"type": "start-step"})
        );
    }

    #[test]
    fn parse_skips_custom_data_frames() {
        let custom = StreamEvent::new("", r#"{"type":"data-weather","data":{"t":1}}"#);
        assert!(UiEvent::parse(&custom).unwrap().is_none());
        assert!(UiEvent::parse(&StreamEvent::done()).unwrap().is_none());
        let start = StreamEvent::new("", r#"{"type":"start","messageId":"m1"}"#);
        assert_eq!(
            UiEvent::parse(&start).unwrap(),
            Some(UiEvent::Start {
                message_id: Some("m1".into())
            })
        );
    }

    #[test]
    fn stream_headers_include_marker() {
        let headers = DataStreamInbound::new().stream_headers();
        assert_eq!(headers.len(), 4);
        assert!(headers
            .iter()
            .any(|(k, v)| k == STREAM_MARKER_HEADER && v == "v1"));
    }
}
