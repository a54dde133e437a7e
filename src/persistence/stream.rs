//! Stream decorator that records every event and commits on close.

use crate::stream::{BoxChunkStream, ChunkStream};
use crate::types::StreamEvent;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Where a [`PersistentStream`] writes to. Inbound sinks store client-bound
/// events against the request; outbound sinks store provider events against
/// the current execution.
#[async_trait]
pub trait StreamSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_chunk(&self, event: &StreamEvent) -> Result<()>;

    /// The source was exhausted cleanly; `chunks` is every event in order.
    async fn on_complete(&self, chunks: &[StreamEvent]) -> Result<()>;

    async fn on_error(&self, error: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Pending,
    Exhausted,
    Failed(String),
}

const CLOSED_EARLY: &str = "stream closed before completion";

/// Records every event through its sink and commits the outcome on
/// [`close`](ChunkStream::close). A stream dropped without `close` commits
/// from a spawned task, so records never stay in progress.
pub struct PersistentStream {
    inner: BoxChunkStream<StreamEvent>,
    sink: Arc<dyn StreamSink>,
    buffer: Vec<StreamEvent>,
    outcome: Outcome,
    closed: bool,
}

impl PersistentStream {
    pub fn new(inner: BoxChunkStream<StreamEvent>, sink: Box<dyn StreamSink>) -> Self {
        Self {
            inner,
            sink: Arc::from(sink),
            buffer: Vec::new(),
            outcome: Outcome::Pending,
            closed: false,
        }
    }

    pub fn boxed(
        inner: BoxChunkStream<StreamEvent>,
        sink: Box<dyn StreamSink>,
    ) -> BoxChunkStream<StreamEvent> {
        Box::new(Self::new(inner, sink))
    }

    async fn commit(&mut self) {
        commit(self.sink.as_ref(), &self.outcome, &self.buffer).await;
    }
}

async fn commit(sink: &dyn StreamSink, outcome: &Outcome, buffer: &[StreamEvent]) {
    let result = match outcome {
        Outcome::Exhausted => sink.on_complete(buffer).await,
        Outcome::Failed(error) => sink.on_error(error).await,
        Outcome::Pending => sink.on_error(CLOSED_EARLY).await,
    };
    if let Err(e) = result {
        warn!(sink = sink.name(), error = %e, "failed to persist stream result");
    }
}

impl Drop for PersistentStream {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let sink = self.sink.clone();
        let outcome = std::mem::replace(&mut self.outcome, Outcome::Pending);
        let buffer = std::mem::take(&mut self.buffer);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    commit(sink.as_ref(), &outcome, &buffer).await;
                });
            }
            Err(_) => {
                warn!(sink = sink.name(), "stream dropped outside a runtime; result not persisted");
            }
        }
    }
}

#[async_trait]
impl ChunkStream<StreamEvent> for PersistentStream {
    async fn next(&mut self) -> Option<Result<StreamEvent>> {
        if self.closed || self.outcome != Outcome::Pending {
            return None;
        }
        match self.inner.next().await {
            Some(Ok(event)) => {
                if let Err(e) = self.sink.on_chunk(&event).await {
                    warn!(sink = self.sink.name(), error = %e, "failed to persist stream chunk");
                }
                self.buffer.push(event.clone());
                Some(Ok(event))
            }
            Some(Err(e)) => {
                self.outcome = Outcome::Failed(e.to_string());
                Some(Err(e))
            }
            None => {
                self.outcome = Outcome::Exhausted;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.inner.close().await;
        self.commit().await;
        result
    }
}
