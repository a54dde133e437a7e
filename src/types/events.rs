//! Wire-level streaming event exchanged between executors and transformers.

use bytes::Bytes;

/// One protocol-agnostic unit of a streamed reply.
///
/// Executors produce these from the provider's transport (SSE frames, binary
/// event frames); inbound transformers produce them for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub last_event_id: Option<String>,
    pub event_type: String,
    pub data: Bytes,
}

impl StreamEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            last_event_id: None,
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    /// Event whose payload is a JSON value.
    pub fn json(event_type: impl Into<String>, value: &serde_json::Value) -> crate::Result<Self> {
        Ok(Self::new(event_type, serde_json::to_vec(value)?))
    }

    /// The `[DONE]` terminator used by OpenAI-style streams.
    pub fn done() -> Self {
        Self::new("", Bytes::from_static(b"[DONE]"))
    }

    pub fn is_done(&self) -> bool {
        self.data.as_ref() == b"[DONE]"
    }

    pub fn data_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}
