use super::{Executor, HttpRequest, HttpResponse, TransportError};
use crate::codec::sse::SseDecoder;
use crate::context::RequestContext;
use crate::stream::{BoxChunkStream, ByteStream, CancellableStream};
use crate::types::StreamEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

/// Client tuning knobs; every field falls back to an env var, then a default.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HttpExecutorConfig {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    #[serde(default)]
    pub pool_idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

/// Plain HTTP executor: JSON bodies, SSE streams.
#[derive(Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpExecutor {
    pub fn new(config: &HttpExecutorConfig) -> Result<Self> {
        let timeout_secs = config
            .timeout_secs
            .or_else(|| env_u64("AXONHUB_HTTP_TIMEOUT_SECS"))
            .unwrap_or(60);
        let connect_timeout_secs = config.connect_timeout_secs.unwrap_or(10);

        // No whole-request timeout on the client: streamed bodies may legitimately
        // run for minutes. The provider timeout bounds time-to-headers instead.
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .pool_max_idle_per_host(
                config
                    .pool_max_idle_per_host
                    .or_else(|| env_u64("AXONHUB_HTTP_POOL_MAX_IDLE_PER_HOST").map(|v| v as usize))
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                config.pool_idle_timeout_secs.unwrap_or(90),
            )))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        let proxy_url = config
            .proxy_url
            .clone()
            .or_else(|| env::var("AXONHUB_PROXY_URL").ok());
        if let Some(proxy_url) = proxy_url {
            let proxy = Proxy::all(&proxy_url).map_err(TransportError::Http)?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(TransportError::Http)?;
        Ok(Self {
            client,
            default_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Send a request and return the response once headers arrived and the
    /// status was checked.
    pub(crate) async fn send(
        &self,
        ctx: &RequestContext,
        request: &HttpRequest,
    ) -> Result<reqwest::Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            Error::Transport(TransportError::Other(format!(
                "invalid method {}: {}",
                request.method, e
            )))
        })?;
        let mut builder = self
            .client
            .request(method, &request.url)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let timeout = ctx.provider_timeout.unwrap_or(self.default_timeout);
        let start = std::time::Instant::now();
        let resp = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, builder.send()) => match result {
                Ok(resp) => resp.map_err(TransportError::Http)?,
                Err(_) => {
                    return Err(Error::Transport(TransportError::Other(format!(
                        "connection timeout after {}ms",
                        timeout.as_millis()
                    ))))
                }
            },
        };

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            info!(
                http_status = status,
                url = request.url.as_str(),
                duration_ms = start.elapsed().as_millis(),
                "upstream request failed"
            );
            return Err(Error::http(
                request.method.clone(),
                request.url.clone(),
                status,
                body,
            ));
        }

        debug!(
            http_status = status,
            url = request.url.as_str(),
            duration_ms = start.elapsed().as_millis(),
            "upstream responded"
        );
        Ok(resp)
    }

    pub(crate) fn body_stream(
        ctx: &RequestContext,
        resp: reqwest::Response,
    ) -> BoxChunkStream<bytes::Bytes> {
        let bytes = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e)));
        Box::new(CancellableStream::new(
            Box::new(ByteStream::new(Box::pin(bytes))),
            ctx.cancel.clone(),
        ))
    }
}

pub(crate) fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect()
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, ctx: &RequestContext, request: &HttpRequest) -> Result<HttpResponse> {
        let resp = self.send(ctx, request).await?;
        let status = resp.status().as_u16();
        let headers = collect_headers(resp.headers());
        let body = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            body = resp.bytes() => body.map_err(TransportError::Http)?,
        };
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn execute_stream(
        &self,
        ctx: &RequestContext,
        request: &HttpRequest,
    ) -> Result<BoxChunkStream<StreamEvent>> {
        let mut request = request.clone();
        request.set_header("accept", "text/event-stream");
        let resp = self.send(ctx, &request).await?;
        Ok(SseDecoder::boxed(Self::body_stream(ctx, resp)))
    }
}
