//! Per-request ambient context: cancellation and the two timeout scopes.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Carried through the pipeline into executors and decoders.
///
/// `request_timeout` bounds the whole logical request up to the first byte of
/// the reply (all channel attempts included); `provider_timeout` bounds a
/// single upstream call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub cancel: CancellationToken,
    pub request_timeout: Option<Duration>,
    pub provider_timeout: Option<Duration>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Child context whose cancellation does not leak to the parent.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            request_timeout: self.request_timeout,
            provider_timeout: self.provider_timeout,
        }
    }
}
