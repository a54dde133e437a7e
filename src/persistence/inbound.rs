use super::state::{lock_state, SharedState};
use super::stream::{PersistentStream, StreamSink};
use super::{NewRequest, PersistenceService};
use crate::stream::BoxChunkStream;
use crate::transformer::{AggregateMeta, ApiFormat, Inbound};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wraps a client-side dialect so the call is recorded as one request.
pub struct PersistentInboundTransformer {
    inner: Arc<dyn Inbound>,
    state: SharedState,
}

impl PersistentInboundTransformer {
    pub fn new(inner: Arc<dyn Inbound>, state: SharedState) -> Self {
        Self { inner, state }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    fn request_handle(&self) -> Option<(Arc<dyn PersistenceService>, String)> {
        let state = lock_state(&self.state);
        let id = state.request_id()?.to_string();
        Some((state.persistence.clone(), id))
    }
}

struct RequestSink {
    persistence: Arc<dyn PersistenceService>,
    request_id: String,
    inbound: Arc<dyn Inbound>,
}

#[async_trait]
impl StreamSink for RequestSink {
    fn name(&self) -> &'static str {
        "request"
    }

    async fn on_chunk(&self, event: &StreamEvent) -> Result<()> {
        self.persistence
            .append_request_chunk(&self.request_id, event)
            .await
    }

    async fn on_complete(&self, chunks: &[StreamEvent]) -> Result<()> {
        let (body, meta) = self.inbound.aggregate_stream_chunks(chunks)?;
        debug!(
            request_id = self.request_id.as_str(),
            chunks = chunks.len(),
            finish_reason = meta.finish_reason.as_deref().unwrap_or_default(),
            "request stream completed"
        );
        self.persistence.complete_request(&self.request_id, body).await
    }

    async fn on_error(&self, error: &str) -> Result<()> {
        self.persistence.fail_request(&self.request_id, error).await
    }
}

#[async_trait]
impl Inbound for PersistentInboundTransformer {
    fn api_format(&self) -> ApiFormat {
        self.inner.api_format()
    }

    /// Parses through the wrapped dialect, then creates the request record on
    /// the first success only.
    async fn transform_request(&self, request: &HttpRequest) -> Result<Request> {
        let unified = self.inner.transform_request(request).await?;
        let persistence = {
            let state = lock_state(&self.state);
            if state.request.is_some() {
                return Ok(unified);
            }
            state.persistence.clone()
        };
        let record = persistence
            .create_request(NewRequest {
                model: unified.model.clone(),
                api_format: self.inner.api_format(),
                stream: unified.is_stream(),
                body: request.body.clone(),
            })
            .await?;
        debug!(request_id = record.id.as_str(), model = record.model.as_str(), "request recorded");
        lock_state(&self.state).request = Some(record);
        Ok(unified)
    }

    async fn transform_response(&self, response: &Response) -> Result<HttpResponse> {
        let http = self.inner.transform_response(response).await?;
        if let Some((persistence, id)) = self.request_handle() {
            if let Err(e) = persistence.complete_request(&id, http.body.clone()).await {
                warn!(request_id = id.as_str(), error = %e, "failed to complete request record");
            }
        }
        Ok(http)
    }

    async fn transform_stream(
        &self,
        stream: BoxChunkStream<Response>,
    ) -> Result<BoxChunkStream<StreamEvent>> {
        let events = self.inner.transform_stream(stream).await?;
        match self.request_handle() {
            Some((persistence, request_id)) => Ok(PersistentStream::boxed(
                events,
                Box::new(RequestSink {
                    persistence,
                    request_id,
                    inbound: self.inner.clone(),
                }),
            )),
            None => Ok(events),
        }
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, AggregateMeta)> {
        self.inner.aggregate_stream_chunks(chunks)
    }

    /// Every failure reaching the client passes here, so this is where the
    /// request record is marked failed.
    async fn transform_error(&self, error: &Error) -> HttpResponse {
        if let Some((persistence, id)) = self.request_handle() {
            if let Err(e) = persistence.fail_request(&id, &error.to_string()).await {
                warn!(request_id = id.as_str(), error = %e, "failed to mark request failed");
            }
        }
        self.inner.transform_error(error).await
    }

    fn stream_headers(&self) -> Vec<(String, String)> {
        self.inner.stream_headers()
    }

    fn encode_event(&self, event: &StreamEvent) -> Bytes {
        self.inner.encode_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryPersistence, PersistenceState, RecordStatus};
    use crate::stream::VecStream;
    use crate::transformer::openai::OpenAiInbound;
    use crate::types::Delta;

    fn setup() -> (Arc<InMemoryPersistence>, PersistentInboundTransformer) {
        let store = Arc::new(InMemoryPersistence::new());
        let state = PersistenceState::new(store.clone(), store.clone()).shared();
        (
            store,
            PersistentInboundTransformer::new(Arc::new(OpenAiInbound::new()), state),
        )
    }

    fn http(body: &str) -> HttpRequest {
        HttpRequest::post("/v1/chat/completions", body.to_string())
    }

    #[tokio::test]
    async fn request_record_is_created_once() {
        let (store, inbound) = setup();
        let body = r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hi"}]}"#;
        inbound.transform_request(&http(body)).await.unwrap();
        inbound.transform_request(&http(body)).await.unwrap();
        assert_eq!(store.requests().len(), 1);
        assert_eq!(store.requests()[0].status, RecordStatus::Processing);
    }

    #[tokio::test]
    async fn invalid_request_creates_no_record() {
        let (store, inbound) = setup();
        assert!(inbound.transform_request(&http("{")).await.is_err());
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn stream_is_recorded_and_aggregated() {
        let (store, inbound) = setup();
        let body = r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hi"}],"stream":true}"#;
        inbound.transform_request(&http(body)).await.unwrap();

        let source: BoxChunkStream<Response> = Box::new(VecStream::new(vec![
            Response::chunk("c1", "gpt-4").with_delta(Delta::text("Hel")),
            Response::chunk("c1", "gpt-4").with_delta(Delta::text("lo")),
            Response::chunk("c1", "gpt-4").with_finish_reason("stop"),
        ]));
        let mut stream = inbound.transform_stream(source).await.unwrap();
        let mut count = 0;
        while let Some(item) = stream.next().await {
            item.unwrap();
            count += 1;
        }
        stream.close().await.unwrap();

        let request = store.requests()[0].clone();
        assert_eq!(store.request_chunks(&request.id).len(), count);
        assert_eq!(request.status, RecordStatus::Completed);
        let final_body: serde_json::Value =
            serde_json::from_slice(request.response_body.as_ref().unwrap()).unwrap();
        assert_eq!(final_body["choices"][0]["message"]["content"], "Hello");

        // A second close leaves the record untouched.
        stream.close().await.unwrap();
        assert_eq!(store.requests()[0], request);
    }

    #[tokio::test]
    async fn transform_error_marks_request_failed() {
        let (store, inbound) = setup();
        let body = r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hi"}]}"#;
        inbound.transform_request(&http(body)).await.unwrap();
        let resp = inbound
            .transform_error(&Error::NoChannel { model: "gpt-4".into() })
            .await;
        assert_eq!(resp.status, 503);
        assert_eq!(store.requests()[0].status, RecordStatus::Failed);
    }
}
