use super::stream::{aggregate_events, StreamEncoder};
use super::{
    error_body, finish_reason_from_stop, from_messages_request, to_messages_response,
    MessagesRequest,
};
use crate::stream::{BoxChunkStream, ConvertStream};
use crate::transformer::{parse_body, validate_request, AggregateMeta, ApiFormat, Inbound};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Serves clients speaking the Anthropic Messages protocol.
#[derive(Debug, Clone, Default)]
pub struct AnthropicInbound;

impl AnthropicInbound {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Inbound for AnthropicInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::AnthropicMessages
    }

    async fn transform_request(&self, request: &HttpRequest) -> Result<Request> {
        let parsed: MessagesRequest = parse_body(&request.body)?;
        let unified = from_messages_request(parsed)?;
        validate_request(&unified)?;
        Ok(unified)
    }

    async fn transform_response(&self, response: &Response) -> Result<HttpResponse> {
        HttpResponse::json(200, &to_messages_response(response))
    }

    async fn transform_stream(
        &self,
        stream: BoxChunkStream<Response>,
    ) -> Result<BoxChunkStream<StreamEvent>> {
        Ok(ConvertStream::boxed(stream, StreamEncoder::new()))
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, AggregateMeta)> {
        let response = aggregate_events(chunks)?;
        let meta = AggregateMeta {
            id: Some(response.id.clone()).filter(|s| !s.is_empty()),
            model: Some(response.model.clone()).filter(|s| !s.is_empty()),
            finish_reason: response.stop_reason.as_deref().map(finish_reason_from_stop),
            usage: Some(response.usage.to_usage()),
        };
        Ok((Bytes::from(serde_json::to_vec(&response)?), meta))
    }

    async fn transform_error(&self, error: &Error) -> HttpResponse {
        HttpResponse::json(error.status_code(), &error_body(error))
            .unwrap_or_else(|_| HttpResponse::new(error.status_code(), error.to_string()))
    }
}
