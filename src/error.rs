use crate::codec::DecodeError;
use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "request.messages[0].role")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "openai_inbound", "channel_registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An upstream HTTP reply with a status >= 400, captured verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} returned HTTP {}: {}",
            self.method, self.url, self.status, self.body
        )
    }
}

/// Unified error type for the gateway core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Upstream error: {0}")]
    Http(Box<HttpError>),

    /// Upstream failure after dialect-specific translation.
    #[error("API error: HTTP {status} ({error_type}): {message}")]
    Api {
        status: u16,
        error_type: String,
        code: Option<String>,
        message: String,
    },

    #[error("Stream decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("No available channel for model {model}")]
    NoChannel { model: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn http(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Error::Http(Box::new(HttpError {
            method: method.into(),
            url: url.into(),
            status,
            body: body.into(),
        }))
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence {
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status a client should see for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } | Error::Serialization(_) => 400,
            Error::Http(e) => e.status,
            Error::Api { status, .. } => *status,
            Error::NoChannel { .. } => 503,
            Error::Timeout => 504,
            Error::Cancelled => 499,
            Error::Transport(_) => 502,
            _ => 500,
        }
    }

    /// Short machine-readable category used by the error encoders.
    pub fn error_type(&self) -> &str {
        match self {
            Error::Validation { .. } | Error::Serialization(_) => "invalid_request_error",
            Error::Api { error_type, .. } => error_type,
            Error::Http(e) if e.status == 429 => "rate_limit_error",
            Error::Http(e) if e.status == 401 || e.status == 403 => "authentication_error",
            Error::Http(_) => "upstream_error",
            Error::NoChannel { .. } => "service_unavailable",
            Error::Timeout => "timeout_error",
            Error::Cancelled => "request_cancelled",
            _ => "api_error",
        }
    }

    /// Message without the variant prefix, for embedding in client-facing bodies.
    pub fn client_message(&self) -> String {
        match self {
            Error::Validation { message, .. }
            | Error::Configuration { message, .. }
            | Error::Runtime { message, .. }
            | Error::Api { message, .. } => message.clone(),
            Error::Http(e) => e.body.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = Error::validation_with_context(
            "unsupported role",
            ErrorContext::new().with_field_path("messages[1].role"),
        );
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_type(), "invalid_request_error");
        assert!(err.to_string().contains("field: messages[1].role"));
        assert_eq!(err.client_message(), "unsupported role");
    }

    #[test]
    fn http_error_keeps_upstream_status() {
        let err = Error::http("POST", "https://api.example.com/v1/chat", 429, "slow down");
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.error_type(), "rate_limit_error");
        assert!(err.to_string().contains("HTTP 429"));
    }
}
