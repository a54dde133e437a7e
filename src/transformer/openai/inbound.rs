use super::{ErrorBody, ErrorDetail};
use crate::stream::{BoxChunkStream, ConvertStream, Converter};
use crate::transformer::{
    parse_body, unified_chunks, validate_request, AggregateMeta, ApiFormat, Inbound,
    ResponseAggregator,
};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Serves clients speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone, Default)]
pub struct OpenAiInbound;

impl OpenAiInbound {
    pub fn new() -> Self {
        Self
    }
}

/// Re-frames unified chunks as SSE data frames and guarantees one `[DONE]`.
#[derive(Default)]
struct ChunkEncoder {
    done_sent: bool,
}

impl Converter<Response, StreamEvent> for ChunkEncoder {
    fn convert(&mut self, chunk: Response) -> Result<Vec<StreamEvent>> {
        if self.done_sent {
            return Ok(Vec::new());
        }
        if chunk.is_done() {
            self.done_sent = true;
            return Ok(vec![StreamEvent::done()]);
        }
        Ok(vec![StreamEvent::new("", serde_json::to_vec(&chunk)?)])
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        if self.done_sent {
            return Ok(Vec::new());
        }
        self.done_sent = true;
        Ok(vec![StreamEvent::done()])
    }
}

#[async_trait]
impl Inbound for OpenAiInbound {
    fn api_format(&self) -> ApiFormat {
        ApiFormat::OpenAiChatCompletion
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
        Ok(ConvertStream::boxed(stream, ChunkEncoder::default()))
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, AggregateMeta)> {
        let response = ResponseAggregator::aggregate(&unified_chunks(chunks));
        let meta = AggregateMeta {
            id: Some(response.id.clone()).filter(|s| !s.is_empty()),
            model: Some(response.model.clone()).filter(|s| !s.is_empty()),
            finish_reason: response.choices.first().and_then(|c| c.finish_reason.clone()),
            usage: response.usage,
        };
        Ok((Bytes::from(serde_json::to_vec(&response)?), meta))
    }

    async fn transform_error(&self, error: &Error) -> HttpResponse {
        let code = match error {
            Error::Api { code, .. } => code.clone().map(serde_json::Value::String),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                message: error.client_message(),
                error_type: error.error_type().to_string(),
                code,
            },
        };
        HttpResponse::json(error.status_code(), &body)
            .unwrap_or_else(|_| HttpResponse::new(error.status_code(), error.to_string()))
    }
}
