//! Wire request/response types and the executor contract.
//!
//! An [`Executor`] performs the network call for a channel. The default is
//! [`HttpExecutor`] (plain HTTP + SSE); providers with their own signed
//! transport supply a custom one.

pub mod http;

pub use http::{HttpExecutor, HttpExecutorConfig};

use crate::context::RequestContext;
use crate::stream::BoxChunkStream;
use crate::types::StreamEvent;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

/// A raw HTTP request in either direction (client → gateway, gateway → provider).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self::post(url, serde_json::to_vec(body)?)
            .with_header("content-type", "application/json"))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace any existing header with the same (case-insensitive) name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A raw HTTP response with a fully buffered body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json<T: Serialize>(status: u16, body: &T) -> Result<Self> {
        let mut resp = Self::new(status, serde_json::to_vec(body)?);
        resp.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        Ok(resp)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Performs upstream calls.
///
/// Implementations must honor `ctx.cancel` and `ctx.provider_timeout`, and
/// turn replies with status >= 400 into [`Error::Http`](crate::Error::Http).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ctx: &RequestContext, request: &HttpRequest) -> Result<HttpResponse>;

    async fn execute_stream(
        &self,
        ctx: &RequestContext,
        request: &HttpRequest,
    ) -> Result<BoxChunkStream<StreamEvent>>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
