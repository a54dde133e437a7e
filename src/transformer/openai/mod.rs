//! OpenAI chat-completions dialect.
//!
//! The unified model already follows this wire shape, so both directions are
//! mostly (de)serialization plus `[DONE]` and error-body handling.

mod inbound;
mod outbound;

pub use inbound::OpenAiInbound;
pub use outbound::OpenAiOutbound;

use crate::error::HttpError;
use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

fn code_string(code: Option<Value>) -> Option<String> {
    match code? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Build an [`Error::Api`] from an `{"error": {...}}` payload, if it is one.
pub(crate) fn api_error_from_value(status: u16, value: &Value) -> Option<Error> {
    let detail: ErrorDetail = serde_json::from_value(value.get("error")?.clone()).ok()?;
    Some(Error::Api {
        status,
        error_type: if detail.error_type.is_empty() {
            "api_error".to_string()
        } else {
            detail.error_type
        },
        code: code_string(detail.code),
        message: detail.message,
    })
}

pub(crate) fn api_error_from_http(e: &HttpError) -> Option<Error> {
    let value: Value = serde_json::from_str(&e.body).ok()?;
    api_error_from_value(e.status, &value)
}
