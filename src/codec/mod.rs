//! Wire codecs: SSE framing and the binary event-stream transport.
//!
//! Both decoders turn a byte [`ChunkStream`](crate::stream::ChunkStream) into
//! [`StreamEvent`](crate::types::StreamEvent)s and keep no provider semantics
//! beyond framing.

pub mod eventstream;
pub mod sse;

/// Decoder-level protocol errors. All of them terminate the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid frame: {0}")]
    Frame(String),

    #[error("checksum mismatch in {section}: expected {expected:#010x}, got {actual:#010x}")]
    Checksum {
        section: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("invalid JSON payload: {0}")]
    Json(String),

    #[error("received exception {code}: {message}")]
    Exception { code: String, message: String },

    #[error("received error {code}: {message}")]
    Remote { code: String, message: String },

    #[error("stream ended inside a frame ({0} bytes left)")]
    Truncated(usize),
}
