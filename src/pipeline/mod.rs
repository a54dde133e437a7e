//! # Request Pipeline
//!
//! Drives one client call end to end:
//!
//! ```text
//! client bytes → Inbound → unified Request → (per channel) Outbound → Executor
//!                                                          │
//! client bytes ← Inbound ← unified Response ← Outbound ←───┘
//! ```
//!
//! Both transformers are wrapped by their persistent decorators, so the call
//! produces one request record plus one execution record per channel attempt.
//! A failed attempt moves to the next candidate channel when [`RetryPolicy`]
//! allows it; the last error is translated by the outbound dialect and then
//! the inbound dialect. Errors before any provider contact skip the outbound
//! translation.

pub mod retry;

pub use crate::context::RequestContext;
pub use retry::RetryPolicy;

use crate::channel::ChannelSelector;
use crate::persistence::{
    lock_state, PersistenceService, PersistenceState, PersistentInboundTransformer,
    PersistentOutboundTransformer, UsageService,
};
use crate::stream::BoxChunkStream;
use crate::transformer::{Inbound, Outbound};
use crate::transport::{Executor, HttpRequest, HttpResponse};
use crate::types::{Request, StreamEvent};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What the HTTP layer writes back to the client.
pub enum PipelineResponse {
    Json(HttpResponse),
    /// Events are framed for the wire with [`Inbound::encode_event`].
    Stream {
        headers: Vec<(String, String)>,
        stream: BoxChunkStream<StreamEvent>,
    },
}

impl PipelineResponse {
    pub fn is_stream(&self) -> bool {
        matches!(self, PipelineResponse::Stream { .. })
    }

    pub fn status(&self) -> u16 {
        match self {
            PipelineResponse::Json(resp) => resp.status,
            PipelineResponse::Stream { .. } => 200,
        }
    }
}

impl std::fmt::Debug for PipelineResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineResponse::Json(resp) => f.debug_tuple("Json").field(resp).finish(),
            PipelineResponse::Stream { headers, .. } => f
                .debug_struct("Stream")
                .field("headers", headers)
                .finish_non_exhaustive(),
        }
    }
}

pub struct Pipeline {
    selector: Arc<dyn ChannelSelector>,
    executor: Arc<dyn Executor>,
    persistence: Arc<dyn PersistenceService>,
    usage: Arc<dyn UsageService>,
    retry: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl Pipeline {
    /// `executor` serves every channel that does not bring its own.
    pub fn new(
        selector: Arc<dyn ChannelSelector>,
        executor: Arc<dyn Executor>,
        persistence: Arc<dyn PersistenceService>,
        usage: Arc<dyn UsageService>,
    ) -> Self {
        Self {
            selector,
            executor,
            persistence,
            usage,
            retry: RetryPolicy::default(),
            request_timeout: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Default bound for a whole call when the context carries none.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one client call. Never fails: errors come back as the inbound
    /// dialect's error response.
    pub async fn process(
        &self,
        ctx: &RequestContext,
        inbound: Arc<dyn Inbound>,
        request: &HttpRequest,
    ) -> PipelineResponse {
        let state = PersistenceState::new(self.persistence.clone(), self.usage.clone()).shared();
        let inbound = PersistentInboundTransformer::new(inbound, state.clone());
        let outbound = PersistentOutboundTransformer::new(state);
        let start = Instant::now();

        let run = self.run(ctx, &inbound, &outbound, request);
        let result = match ctx.request_timeout.or(self.request_timeout) {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    outbound.fail_current(&Error::Timeout).await;
                    Err(Error::Timeout)
                }
            },
            None => run.await,
        };

        match result {
            Ok(response) => response,
            Err(error) => {
                let response = inbound.transform_error(&error).await;
                info!(
                    api_format = %inbound.api_format(),
                    status = response.status,
                    error = %error,
                    duration_ms = start.elapsed().as_millis(),
                    "request failed"
                );
                PipelineResponse::Json(response)
            }
        }
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        inbound: &PersistentInboundTransformer,
        outbound: &PersistentOutboundTransformer,
        request: &HttpRequest,
    ) -> Result<PipelineResponse> {
        let unified = inbound.transform_request(request).await?;
        let channels = self.selector.select(&unified).await?;
        lock_state(inbound.state()).channels = channels;

        let mut attempt = 0;
        loop {
            attempt += 1;
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let channel = outbound.current_channel()?;
            let start = Instant::now();
            match self.attempt(ctx, inbound, outbound, &unified).await {
                Ok(response) => {
                    info!(
                        channel = channel.id.as_str(),
                        model = unified.model.as_str(),
                        attempt,
                        stream = response.is_stream(),
                        duration_ms = start.elapsed().as_millis(),
                        "request served"
                    );
                    return Ok(response);
                }
                Err(error) => {
                    outbound.fail_current(&error).await;
                    if self.retry.should_retry(attempt, &error) && outbound.has_next_channel() {
                        warn!(
                            channel = channel.id.as_str(),
                            attempt,
                            error = %error,
                            "attempt failed, trying next channel"
                        );
                        outbound.next_channel();
                        continue;
                    }
                    return Err(outbound.transform_error(error).await);
                }
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &RequestContext,
        inbound: &PersistentInboundTransformer,
        outbound: &PersistentOutboundTransformer,
        request: &Request,
    ) -> Result<PipelineResponse> {
        let provider_request = outbound.transform_request(request).await?;
        let executor = outbound
            .custom_executor()
            .unwrap_or_else(|| self.executor.clone());

        if request.is_stream() {
            let events = executor.execute_stream(ctx, &provider_request).await?;
            let unified = outbound.transform_stream(events).await?;
            let stream = inbound.transform_stream(unified).await?;
            Ok(PipelineResponse::Stream {
                headers: inbound.stream_headers(),
                stream,
            })
        } else {
            let response = executor.execute(ctx, &provider_request).await?;
            let unified = outbound.transform_response(&response).await?;
            Ok(PipelineResponse::Json(inbound.transform_response(&unified).await?))
        }
    }
}
