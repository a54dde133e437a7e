//! # Transformer Module
//!
//! One small interface pair decouples wire dialects from the pipeline:
//!
//! - [`Inbound`]: client wire format ↔ unified model
//! - [`Outbound`]: unified model ↔ provider wire format
//!
//! Each dialect lives in its own submodule. The pipeline only ever holds
//! `Arc<dyn Inbound>` / `Arc<dyn Outbound>` and never branches on a dialect.
//!
//! | Dialect | Inbound | Outbound |
//! |---------|---------|----------|
//! | OpenAI chat completions | [`openai::OpenAiInbound`] | [`openai::OpenAiOutbound`] |
//! | Anthropic messages | [`anthropic::AnthropicInbound`] | [`anthropic::AnthropicOutbound`] |
//! | UI text protocol | [`ui_text::UiTextInbound`] | - |
//! | UI data stream v1 | [`data_stream::DataStreamInbound`] | - |
//! | Bedrock | - | [`bedrock::BedrockOutbound`] |

pub mod aggregate;
pub mod anthropic;
pub mod bedrock;
pub mod data_stream;
pub mod openai;
pub mod ui_text;

pub use aggregate::ResponseAggregator;

use crate::codec::sse;
use crate::error::ErrorContext;
use crate::stream::BoxChunkStream;
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent, Usage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire dialect identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    OpenAiChatCompletion,
    AnthropicMessages,
    UiText,
    UiDataStream,
    Bedrock,
}

impl ApiFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFormat::OpenAiChatCompletion => "openai_chat_completion",
            ApiFormat::AnthropicMessages => "anthropic_messages",
            ApiFormat::UiText => "ui_text",
            ApiFormat::UiDataStream => "ui_data_stream",
            ApiFormat::Bedrock => "bedrock",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" | "openai_chat_completion" => Ok(ApiFormat::OpenAiChatCompletion),
            "anthropic" | "anthropic_messages" => Ok(ApiFormat::AnthropicMessages),
            "ui_text" | "text" => Ok(ApiFormat::UiText),
            "ui_data_stream" | "data_stream" => Ok(ApiFormat::UiDataStream),
            "bedrock" => Ok(ApiFormat::Bedrock),
            other => Err(Error::validation(format!("unknown api format: {other}"))),
        }
    }
}

/// Metadata recovered while aggregating a client-bound stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateMeta {
    pub id: Option<String>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Client wire format ↔ unified model.
#[async_trait]
pub trait Inbound: Send + Sync {
    fn api_format(&self) -> ApiFormat;

    async fn transform_request(&self, request: &HttpRequest) -> Result<Request>;

    async fn transform_response(&self, response: &Response) -> Result<HttpResponse>;

    /// Called at most once per unified stream; pulls lazily.
    async fn transform_stream(
        &self,
        stream: BoxChunkStream<Response>,
    ) -> Result<BoxChunkStream<StreamEvent>>;

    /// Fold the exact ordered list of emitted events into a final body.
    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, AggregateMeta)>;

    async fn transform_error(&self, error: &Error) -> HttpResponse;

    /// Response headers for a streamed reply.
    fn stream_headers(&self) -> Vec<(String, String)> {
        sse_headers()
    }

    /// Frame one event for the client connection.
    fn encode_event(&self, event: &StreamEvent) -> Bytes {
        sse::encode_event(event)
    }
}

/// Unified model ↔ provider wire format.
#[async_trait]
pub trait Outbound: Send + Sync {
    fn api_format(&self) -> ApiFormat;

    async fn transform_request(&self, request: &Request) -> Result<HttpRequest>;

    async fn transform_response(&self, response: &HttpResponse) -> Result<Response>;

    async fn transform_stream(
        &self,
        stream: BoxChunkStream<StreamEvent>,
    ) -> Result<BoxChunkStream<Response>>;

    /// Rebuild a final provider body and the token usage from raw events.
    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, Option<Usage>)>;

    /// Translate a transport/upstream error into the dialect's structured form.
    async fn transform_error(&self, error: Error) -> Error;
}

pub fn sse_headers() -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "text/event-stream".to_string()),
        ("Cache-Control".to_string(), "no-cache".to_string()),
        ("Connection".to_string(), "keep-alive".to_string()),
    ]
}

/// Parse a JSON request body, mapping failures to a validation error.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        Error::validation_with_context(
            "invalid request body",
            ErrorContext::new().with_details(e.to_string()),
        )
    })
}

/// Reject requests no channel could serve.
pub(crate) fn validate_request(request: &Request) -> Result<()> {
    if request.model.trim().is_empty() {
        return Err(Error::validation_with_context(
            "model is required",
            ErrorContext::new().with_field_path("model"),
        ));
    }
    if request.messages.is_empty() {
        return Err(Error::validation_with_context(
            "messages must not be empty",
            ErrorContext::new().with_field_path("messages"),
        ));
    }
    Ok(())
}

/// Decode each event's data as a unified chunk. Used when provider and
/// client speak the same shape and only need re-framing.
pub(crate) fn unified_chunks(chunks: &[StreamEvent]) -> Vec<Response> {
    chunks
        .iter()
        .filter(|e| !e.is_done())
        .filter_map(|e| serde_json::from_slice::<Response>(&e.data).ok())
        .collect()
}
