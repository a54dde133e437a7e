//! Anthropic models hosted on AWS Bedrock.
//!
//! The body is the Anthropic-native JSON with `model` and `stream` removed
//! (both live in the URL) and `anthropic_version` pinned. Requests are SigV4
//! signed by [`BedrockExecutor`]; streamed replies arrive as binary
//! event-stream frames wrapping Anthropic stream events.

pub mod executor;
pub mod signer;

pub use executor::BedrockExecutor;
pub use signer::{AwsCredentials, SigV4Signer};

use crate::codec::DecodeError;
use crate::stream::{BoxChunkStream, ConvertStream};
use crate::transformer::anthropic::outbound::{
    aggregate_provider_events, parse_messages_response, translate_error,
};
use crate::transformer::anthropic::stream::StreamDecoder;
use crate::transformer::anthropic::to_messages_request;
use crate::transformer::{ApiFormat, Outbound};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent, Usage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
pub const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

/// Maps AWS exception names onto client-facing statuses and error types.
fn classify_exception(code: &str) -> (u16, &'static str) {
    match code {
        "ValidationException" => (400, "invalid_request_error"),
        "AccessDeniedException" | "UnrecognizedClientException" => (403, "permission_error"),
        "ResourceNotFoundException" => (404, "not_found_error"),
        "ThrottlingException" | "ServiceQuotaExceededException" => (429, "rate_limit_error"),
        "ModelTimeoutException" => (408, "timeout_error"),
        "ServiceUnavailableException" | "ModelNotReadyException" => (503, "overloaded_error"),
        "ModelErrorException" | "ModelStreamErrorException" => (424, "api_error"),
        _ => (500, "api_error"),
    }
}

fn error_type_for_status(status: u16) -> &'static str {
    match status {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        503 => "overloaded_error",
        _ => "api_error",
    }
}

#[derive(Debug, Clone)]
pub struct BedrockOutbound {
    base_url: String,
}

impl BedrockOutbound {
    /// `base_url` overrides the regional runtime endpoint.
    pub fn new(base_url: Option<&str>, region: &str) -> Self {
        let base_url = match base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{region}.amazonaws.com"),
        };
        Self { base_url }
    }

    pub fn endpoint(&self, model: &str, stream: bool) -> String {
        let action = if stream {
            "invoke-with-response-stream"
        } else {
            "invoke"
        };
        format!(
            "{}/model/{}/{}",
            self.base_url,
            urlencoding::encode(model),
            action
        )
    }
}

/// Translate an upstream Bedrock failure into [`Error::Api`].
///
/// Non-streamed errors carry `{"message": ...}` and an optional
/// `__type`/`x-amzn-ErrorType`; streamed ones surface as decode exceptions.
pub fn bedrock_error(error: Error) -> Error {
    match &error {
        Error::Http(e) => {
            let value: Value = match serde_json::from_str(&e.body) {
                Ok(v) => v,
                Err(_) => return error,
            };
            // An Anthropic-shaped body passes through unchanged in meaning.
            if value.get("type").and_then(Value::as_str) == Some("error") {
                return translate_error(error);
            }
            let message = value
                .get("message")
                .or_else(|| value.get("Message"))
                .and_then(Value::as_str);
            let Some(message) = message else {
                return error;
            };
            let code = value
                .get("__type")
                .and_then(Value::as_str)
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
            Error::Api {
                status: e.status,
                error_type: error_type_for_status(e.status).to_string(),
                code,
                message: message.to_string(),
            }
        }
        Error::Decode(DecodeError::Exception { code, message })
        | Error::Decode(DecodeError::Remote { code, message }) => {
            let (status, error_type) = classify_exception(code);
            Error::Api {
                status,
                error_type: error_type.to_string(),
                code: Some(code.clone()),
                message: message.clone(),
            }
        }
        _ => error,
    }
}

#[async_trait]
impl Outbound for BedrockOutbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::Bedrock
    }

    async fn transform_request(&self, request: &Request) -> Result<HttpRequest> {
        let mut body = to_messages_request(request)?;
        body.model.clear();
        body.stream = None;
        if body.anthropic_version.is_none() {
            body.anthropic_version = Some(BEDROCK_ANTHROPIC_VERSION.to_string());
        }

        let stream = request.is_stream();
        let accept = if stream {
            EVENT_STREAM_CONTENT_TYPE
        } else {
            "application/json"
        };
        Ok(
            HttpRequest::post_json(self.endpoint(&request.model, stream), &body)?
                .with_header("accept", accept),
        )
    }

    async fn transform_response(&self, response: &HttpResponse) -> Result<Response> {
        parse_messages_response(response)
    }

    async fn transform_stream(
        &self,
        stream: BoxChunkStream<StreamEvent>,
    ) -> Result<BoxChunkStream<Response>> {
        Ok(ConvertStream::boxed(stream, StreamDecoder::new()))
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, Option<Usage>)> {
        aggregate_provider_events(chunks)
    }

    async fn transform_error(&self, error: Error) -> Error {
        bedrock_error(error)
    }
}
