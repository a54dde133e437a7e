//! Request/execution bookkeeping around the pipeline.
//!
//! Storage is external: the core talks to it through [`PersistenceService`]
//! and [`UsageService`]. One [`RequestRecord`] is written per inbound call and
//! one [`ExecutionRecord`] per channel attempt. Streams are wrapped by
//! [`PersistentStream`] so every event is stored as it passes and the final
//! body is aggregated on close.

pub mod inbound;
pub mod memory;
pub mod outbound;
pub mod state;
pub mod stream;

pub use inbound::PersistentInboundTransformer;
pub use memory::InMemoryPersistence;
pub use outbound::PersistentOutboundTransformer;
pub use state::{lock_state, PersistenceState, SharedState};
pub use stream::PersistentStream;

use crate::transformer::ApiFormat;
use crate::types::{StreamEvent, Usage};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub id: String,
    pub model: String,
    pub api_format: ApiFormat,
    pub stream: bool,
    pub request_body: Bytes,
    pub status: RecordStatus,
    pub response_body: Option<Bytes>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub id: String,
    pub request_id: String,
    pub channel_id: String,
    /// Model after channel mapping.
    pub model: String,
    pub request_body: Bytes,
    pub status: RecordStatus,
    pub response_body: Option<Bytes>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub request_id: String,
    pub execution_id: String,
    pub channel_id: String,
    pub model: String,
    pub usage: Usage,
}

/// Fields of a request record known when the inbound call is parsed.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub model: String,
    pub api_format: ApiFormat,
    pub stream: bool,
    pub body: Bytes,
}

/// Fields of an execution record known when an attempt starts.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub request_id: String,
    pub channel_id: String,
    pub model: String,
    pub body: Bytes,
}

#[async_trait]
pub trait PersistenceService: Send + Sync {
    async fn create_request(&self, request: NewRequest) -> Result<RequestRecord>;

    async fn create_execution(&self, execution: NewExecution) -> Result<ExecutionRecord>;

    async fn append_request_chunk(&self, request_id: &str, chunk: &StreamEvent) -> Result<()>;

    async fn append_execution_chunk(&self, execution_id: &str, chunk: &StreamEvent) -> Result<()>;

    async fn complete_request(&self, request_id: &str, body: Bytes) -> Result<()>;

    async fn fail_request(&self, request_id: &str, error: &str) -> Result<()>;

    async fn complete_execution(&self, execution_id: &str, body: Bytes) -> Result<()>;

    async fn fail_execution(&self, execution_id: &str, error: &str) -> Result<()>;
}

#[async_trait]
pub trait UsageService: Send + Sync {
    async fn record_usage(&self, record: UsageRecord) -> Result<()>;
}
