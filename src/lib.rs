//! # axonhub
//!
//! Core of a multi-provider LLM gateway. A client speaks one wire dialect
//! (OpenAI chat completions, Anthropic messages, a UI text or data-stream
//! protocol); the gateway translates the call into a unified model, routes it
//! to one of several configured provider channels with failover, and
//! translates the reply (JSON or stream) back into the client's dialect.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Unified request/response model and stream events |
//! | [`stream`] | Pull-based [`stream::ChunkStream`] and its adapters |
//! | [`codec`] | SSE framing and the binary event-stream decoder |
//! | [`transformer`] | Inbound/outbound dialect contracts and implementations |
//! | [`transport`] | Wire request/response types and executors |
//! | [`channel`] | Channels, model mapping, registry and selection |
//! | [`pipeline`] | Request orchestration with retry and channel failover |
//! | [`persistence`] | Request/execution/usage recording |
//! | [`config`] | YAML configuration with env overrides |
//!
//! ## Example
//!
//! ```rust,no_run
//! use axonhub::channel::{ChannelRegistry, ModelChannelSelector};
//! use axonhub::config::GatewayConfig;
//! use axonhub::persistence::InMemoryPersistence;
//! use axonhub::pipeline::{Pipeline, RequestContext, RetryPolicy};
//! use axonhub::transformer::openai::OpenAiInbound;
//! use axonhub::transport::{HttpExecutor, HttpRequest};
//! use std::sync::Arc;
//!
//! # async fn run() -> axonhub::Result<()> {
//! let config = GatewayConfig::load("gateway.yaml")?;
//! let http = HttpExecutor::new(&config.http)?;
//! let registry = Arc::new(ChannelRegistry::with_channels(
//!     axonhub::channel::registry::channels_from_config(&config, &http)?,
//! ));
//! let store = Arc::new(InMemoryPersistence::new());
//! let pipeline = Pipeline::new(
//!     Arc::new(ModelChannelSelector::new(registry)),
//!     Arc::new(http),
//!     store.clone(),
//!     store,
//! )
//! .with_retry_policy(RetryPolicy::from_config(&config.retry));
//!
//! let body = r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hi"}]}"#;
//! let request = HttpRequest::post("/v1/chat/completions", body);
//! let response = pipeline
//!     .process(&RequestContext::new(), Arc::new(OpenAiInbound::new()), &request)
//!     .await;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod pipeline;
pub mod stream;
pub mod transformer;
pub mod transport;
pub mod types;

pub use channel::Channel;
pub use context::RequestContext;
pub use error::{Error, ErrorContext};
pub use pipeline::{Pipeline, PipelineResponse};
pub use types::{Message, Request, Response, StreamEvent, Usage};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed `futures` stream, used where byte streams come from HTTP.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
