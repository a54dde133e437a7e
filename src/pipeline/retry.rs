//! Retry policy for channel failover.
//!
//! Whether an attempt may move on to the next channel is decided in one place:
//! the error text must contain one of the configured substrings and the
//! attempt budget must not be spent.

use crate::config::{RetryConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRYABLE_ERRORS};
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: usize,
    /// Case-sensitive substrings of the error message.
    pub retryable: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retryable: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, retryable: Vec<String>) -> Self {
        Self {
            max_attempts,
            retryable,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.retryable_errors.clone())
    }

    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self::new(1, Vec::new())
    }

    pub fn is_retryable(&self, error: &Error) -> bool {
        if matches!(error, Error::Cancelled) {
            return false;
        }
        let text = error.to_string();
        self.retryable.iter().any(|s| text.contains(s.as_str()))
    }

    /// `attempt` is 1-based: the attempt that just failed.
    pub fn should_retry(&self, attempt: usize, error: &Error) -> bool {
        attempt < self.max_attempts && self.is_retryable(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorContext;

    fn runtime(msg: &str) -> Error {
        Error::runtime_with_context(msg, ErrorContext::new())
    }

    #[test]
    fn matches_configured_substrings() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&runtime("dial tcp: connection timeout after 30s")));
        assert!(policy.is_retryable(&Error::http("POST", "http://up", 429, "rate limit exceeded")));
        assert!(!policy.is_retryable(&runtime("invalid api key")));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_retryable(&runtime("Connection Timeout")));
    }

    #[test]
    fn budget_bounds_attempts() {
        let policy = RetryPolicy::new(3, vec!["connection timeout".into()]);
        let err = runtime("connection timeout");
        assert!(policy.should_retry(1, &err));
        assert!(policy.should_retry(2, &err));
        assert!(!policy.should_retry(3, &err));
    }

    #[test]
    fn cancellation_is_never_retried() {
        let policy = RetryPolicy::new(3, vec![String::new()]);
        assert!(!policy.should_retry(1, &Error::Cancelled));
        assert!(!RetryPolicy::disabled().should_retry(1, &runtime("connection timeout")));
    }
}
