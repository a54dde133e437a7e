use super::stream::{aggregate_events, StreamDecoder};
use super::{
    api_error_from_value, from_messages_response, to_messages_request, MessagesResponse,
    API_VERSION, DEFAULT_BASE_URL,
};
use crate::error::ErrorContext;
use crate::stream::{BoxChunkStream, ConvertStream};
use crate::transformer::{ApiFormat, Outbound};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent, Usage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Talks to the Anthropic `/v1/messages` endpoint.
#[derive(Debug, Clone)]
pub struct AnthropicOutbound {
    base_url: String,
    api_key: String,
}

impl AnthropicOutbound {
    pub fn new(base_url: Option<&str>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/messages", self.base_url)
        } else {
            format!("{}/v1/messages", self.base_url)
        }
    }
}

/// Parse a non-streamed Messages body, surfacing `{"type":"error"}` payloads.
pub(crate) fn parse_messages_response(response: &HttpResponse) -> Result<Response> {
    let value: Value = serde_json::from_slice(&response.body).map_err(|e| {
        Error::runtime_with_context(
            "invalid upstream response body",
            ErrorContext::new()
                .with_details(e.to_string())
                .with_source("anthropic"),
        )
    })?;
    if value.get("type").and_then(Value::as_str) == Some("error") {
        let status = (response.status >= 400).then_some(response.status);
        if let Some(err) = api_error_from_value(status, &value) {
            return Err(err);
        }
    }
    let parsed: MessagesResponse = serde_json::from_value(value)?;
    Ok(from_messages_response(parsed))
}

pub(crate) fn aggregate_provider_events(chunks: &[StreamEvent]) -> Result<(Bytes, Option<Usage>)> {
    let response = aggregate_events(chunks)?;
    let usage = response.usage.to_usage();
    Ok((Bytes::from(serde_json::to_vec(&response)?), Some(usage)))
}

pub(crate) fn translate_error(error: Error) -> Error {
    match &error {
        Error::Http(e) => serde_json::from_str::<Value>(&e.body)
            .ok()
            .and_then(|v| api_error_from_value(Some(e.status), &v))
            .unwrap_or(error),
        _ => error,
    }
}

#[async_trait]
impl Outbound for AnthropicOutbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::AnthropicMessages
    }

    async fn transform_request(&self, request: &Request) -> Result<HttpRequest> {
        let body = to_messages_request(request)?;
        let mut http = HttpRequest::post_json(self.endpoint(), &body)?
            .with_header("x-api-key", self.api_key.clone())
            .with_header("anthropic-version", API_VERSION);
        if request.is_stream() {
            http.set_header("accept", "text/event-stream");
        }
        Ok(http)
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
        translate_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn builds_messages_request() {
        let outbound = AnthropicOutbound::new(Some("https://proxy.example.com/v1"), "key");
        let request = Request::new("claude-3-opus", vec![Message::user("Hi")]).with_stream(true);
        let http = outbound.transform_request(&request).await.unwrap();

        assert_eq!(http.url, "https://proxy.example.com/v1/messages");
        assert_eq!(http.header("x-api-key"), Some("key"));
        assert_eq!(http.header("anthropic-version"), Some(API_VERSION));
        let body: Value = serde_json::from_slice(&http.body).unwrap();
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn http_error_is_translated() {
        let outbound = AnthropicOutbound::new(None, "key");
        let err = outbound
            .transform_error(Error::http(
                "POST",
                "https://api.anthropic.com/v1/messages",
                429,
                r#"{"type":"error","error":{"type":"rate_limit_error","message":"rate limit exceeded"}}"#,
            ))
            .await;
        assert!(matches!(err, Error::Api { status: 429, ref error_type, .. } if error_type == "rate_limit_error"));
    }
}
