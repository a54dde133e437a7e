use super::state::{lock_state, SharedState};
use super::stream::{PersistentStream, StreamSink};
use super::{NewExecution, PersistenceService, UsageRecord, UsageService};
use crate::channel::Channel;
use crate::error::ErrorContext;
use crate::stream::BoxChunkStream;
use crate::transformer::{ApiFormat, Outbound};
use crate::transport::{Executor, HttpRequest, HttpResponse};
use crate::types::{Request, Response, StreamEvent, Usage};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes unified requests to the current candidate channel and records one
/// execution per attempt.
///
/// Behaves as the current channel's [`Outbound`]; the pipeline moves it to
/// the next candidate with [`next_channel`](Self::next_channel).
pub struct PersistentOutboundTransformer {
    state: SharedState,
}

struct Attempt {
    channel: Arc<Channel>,
    persistence: Arc<dyn PersistenceService>,
    usage: Arc<dyn UsageService>,
    request_id: String,
    execution_id: Option<String>,
    model: String,
}

fn exhausted() -> Error {
    Error::runtime_with_context(
        "no channel left to try",
        ErrorContext::new().with_source("outbound"),
    )
}

impl PersistentOutboundTransformer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub fn current_channel(&self) -> Result<Arc<Channel>> {
        lock_state(&self.state).current_channel().ok_or_else(exhausted)
    }

    /// The current channel's own executor, if it has one.
    pub fn custom_executor(&self) -> Option<Arc<dyn Executor>> {
        lock_state(&self.state)
            .current_channel()
            .and_then(|c| c.executor.clone())
    }

    /// Mark the attempt in flight as failed. No-op if none was recorded.
    pub async fn fail_current(&self, error: &Error) {
        let (persistence, execution) = {
            let state = lock_state(&self.state);
            (state.persistence.clone(), state.execution.clone())
        };
        let Some(execution) = execution else {
            return;
        };
        if let Err(e) = persistence
            .fail_execution(&execution.id, &error.to_string())
            .await
        {
            warn!(execution_id = execution.id.as_str(), error = %e, "failed to mark execution failed");
        }
    }

    pub fn has_next_channel(&self) -> bool {
        let state = lock_state(&self.state);
        state.channel_index + 1 < state.channels.len()
    }

    /// Advance to the next candidate. `false` once every channel was tried.
    pub fn next_channel(&self) -> bool {
        lock_state(&self.state).advance().is_some()
    }

    fn attempt(&self) -> Result<Attempt> {
        let state = lock_state(&self.state);
        let channel = state.current_channel().ok_or_else(exhausted)?;
        Ok(Attempt {
            channel,
            persistence: state.persistence.clone(),
            usage: state.usage.clone(),
            request_id: state.request_id().unwrap_or_default().to_string(),
            execution_id: state.execution.as_ref().map(|e| e.id.clone()),
            model: state
                .execution
                .as_ref()
                .map(|e| e.model.clone())
                .unwrap_or_default(),
        })
    }
}

struct ExecutionSink {
    attempt: Attempt,
    execution_id: String,
}

#[async_trait]
impl StreamSink for ExecutionSink {
    fn name(&self) -> &'static str {
        "execution"
    }

    async fn on_chunk(&self, event: &StreamEvent) -> Result<()> {
        self.attempt
            .persistence
            .append_execution_chunk(&self.execution_id, event)
            .await
    }

    async fn on_complete(&self, chunks: &[StreamEvent]) -> Result<()> {
        let (body, usage) = self.attempt.channel.outbound.aggregate_stream_chunks(chunks)?;
        self.attempt
            .persistence
            .complete_execution(&self.execution_id, body)
            .await?;
        if let Some(usage) = usage {
            record_usage(&self.attempt, &self.execution_id, usage).await?;
        }
        Ok(())
    }

    async fn on_error(&self, error: &str) -> Result<()> {
        self.attempt
            .persistence
            .fail_execution(&self.execution_id, error)
            .await
    }
}

async fn record_usage(attempt: &Attempt, execution_id: &str, usage: Usage) -> Result<()> {
    attempt
        .usage
        .record_usage(UsageRecord {
            request_id: attempt.request_id.clone(),
            execution_id: execution_id.to_string(),
            channel_id: attempt.channel.id.clone(),
            model: attempt.model.clone(),
            usage,
        })
        .await
}

#[async_trait]
impl Outbound for PersistentOutboundTransformer {
    /// Format of the current channel. Falls back to OpenAI when every
    /// channel has been tried.
    fn api_format(&self) -> ApiFormat {
        lock_state(&self.state)
            .current_channel()
            .map(|c| c.outbound.api_format())
            .unwrap_or(ApiFormat::OpenAiChatCompletion)
    }

    /// Rewrites the model through the channel's mapping rules, builds the
    /// provider request and opens a new execution record.
    async fn transform_request(&self, request: &Request) -> Result<HttpRequest> {
        let attempt = self.attempt()?;
        let channel = attempt.channel;

        let mut mapped = request.clone();
        mapped.model = channel.map_model(&request.model);
        let http = channel.outbound.transform_request(&mapped).await?;

        let record = attempt
            .persistence
            .create_execution(NewExecution {
                request_id: attempt.request_id,
                channel_id: channel.id.clone(),
                model: mapped.model.clone(),
                body: http.body.clone(),
            })
            .await?;
        debug!(
            execution_id = record.id.as_str(),
            channel = channel.id.as_str(),
            model = mapped.model.as_str(),
            "execution started"
        );
        lock_state(&self.state).execution = Some(record);
        Ok(http)
    }

    async fn transform_response(&self, response: &HttpResponse) -> Result<Response> {
        let attempt = self.attempt()?;
        let unified = attempt.channel.outbound.transform_response(response).await?;
        if let Some(execution_id) = &attempt.execution_id {
            if let Err(e) = attempt
                .persistence
                .complete_execution(execution_id, response.body.clone())
                .await
            {
                warn!(execution_id = execution_id.as_str(), error = %e, "failed to complete execution");
            }
            if let Some(usage) = unified.usage {
                if let Err(e) = record_usage(&attempt, execution_id, usage).await {
                    warn!(execution_id = execution_id.as_str(), error = %e, "failed to record usage");
                }
            }
        }
        Ok(unified)
    }

    /// Provider events are recorded before conversion, so the execution
    /// keeps the provider's own wire form.
    async fn transform_stream(
        &self,
        stream: BoxChunkStream<StreamEvent>,
    ) -> Result<BoxChunkStream<Response>> {
        let attempt = self.attempt()?;
        let channel = attempt.channel.clone();
        let events = match attempt.execution_id.clone() {
            Some(execution_id) => PersistentStream::boxed(
                stream,
                Box::new(ExecutionSink {
                    attempt,
                    execution_id,
                }),
            ),
            None => stream,
        };
        channel.outbound.transform_stream(events).await
    }

    fn aggregate_stream_chunks(&self, chunks: &[StreamEvent]) -> Result<(Bytes, Option<Usage>)> {
        self.current_channel()?
            .outbound
            .aggregate_stream_chunks(chunks)
    }

    async fn transform_error(&self, error: Error) -> Error {
        match self.current_channel() {
            Ok(channel) => channel.outbound.transform_error(error).await,
            Err(_) => error,
        }
    }
}
