//! Binary event-stream decoder (`application/vnd.amazon.eventstream`).
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! +-------------+--------------+-------------+---------+---------+-------------+
//! | total (u32) | headers(u32) | prelude crc | headers | payload | message crc |
//! +-------------+--------------+-------------+---------+---------+-------------+
//! ```
//!
//! `event` frames whose `:event-type` is `chunk` carry `{"bytes": "<base64>"}`;
//! the decoded bytes are the provider's JSON chunk and its top-level `type`
//! becomes the [`StreamEvent`] type. `exception` and `error` frames terminate
//! the stream.

use super::DecodeError;
use crate::stream::{BoxChunkStream, ChunkStream};
use crate::types::StreamEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PRELUDE_LEN: usize = 12;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub const HEADER_MESSAGE_TYPE: &str = ":message-type";
pub const HEADER_EVENT_TYPE: &str = ":event-type";
pub const HEADER_EXCEPTION_TYPE: &str = ":exception-type";
pub const HEADER_ERROR_CODE: &str = ":error-code";
pub const HEADER_ERROR_MESSAGE: &str = ":error-message";
pub const HEADER_CONTENT_TYPE: &str = ":content-type";

const UNKNOWN_ERROR: &str = "UnknownError";

/// Typed header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::as_str)
    }
}

/// Parse one complete frame (prelude through message CRC).
pub fn parse_frame(mut raw: Bytes) -> std::result::Result<Frame, DecodeError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(DecodeError::Frame(format!("frame too short: {} bytes", raw.len())));
    }
    let total_len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let headers_len = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    let prelude_crc = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);

    if total_len != raw.len() {
        return Err(DecodeError::Frame(format!(
            "length mismatch: prelude says {}, got {}",
            total_len,
            raw.len()
        )));
    }
    let actual = crc32(&raw[..8]);
    if actual != prelude_crc {
        return Err(DecodeError::Checksum {
            section: "prelude",
            expected: prelude_crc,
            actual,
        });
    }
    if headers_len > total_len - MIN_FRAME_LEN {
        return Err(DecodeError::Frame(format!(
            "headers length {} exceeds frame length {}",
            headers_len, total_len
        )));
    }

    let message_crc = u32::from_be_bytes([
        raw[total_len - 4],
        raw[total_len - 3],
        raw[total_len - 2],
        raw[total_len - 1],
    ]);
    let actual = crc32(&raw[..total_len - 4]);
    if actual != message_crc {
        return Err(DecodeError::Checksum {
            section: "message",
            expected: message_crc,
            actual,
        });
    }

    raw.advance(PRELUDE_LEN);
    let mut header_bytes = raw.split_to(headers_len);
    let payload = raw.split_to(total_len - MIN_FRAME_LEN - headers_len);
    let headers = parse_headers(&mut header_bytes)?;
    Ok(Frame { headers, payload })
}

fn parse_headers(buf: &mut Bytes) -> std::result::Result<Vec<(String, HeaderValue)>, DecodeError> {
    let truncated = || DecodeError::Frame("truncated header".to_string());
    let mut headers = Vec::new();

    while buf.has_remaining() {
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len + 1 {
            return Err(truncated());
        }
        let name = String::from_utf8(buf.split_to(name_len).to_vec())
            .map_err(|e| DecodeError::Frame(format!("header name: {}", e)))?;
        let value_type = buf.get_u8();

        let fixed = |n: usize, buf: &Bytes| {
            if buf.remaining() < n {
                Err(truncated())
            } else {
                Ok(())
            }
        };
        let value = match value_type {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                fixed(1, &*buf)?;
                HeaderValue::Byte(buf.get_i8())
            }
            3 => {
                fixed(2, &*buf)?;
                HeaderValue::Short(buf.get_i16())
            }
            4 => {
                fixed(4, &*buf)?;
                HeaderValue::Int(buf.get_i32())
            }
            5 => {
                fixed(8, &*buf)?;
                HeaderValue::Long(buf.get_i64())
            }
            6 | 7 => {
                fixed(2, &*buf)?;
                let len = buf.get_u16() as usize;
                fixed(len, &*buf)?;
                let bytes = buf.split_to(len);
                if value_type == 6 {
                    HeaderValue::Bytes(bytes)
                } else {
                    HeaderValue::String(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| DecodeError::Frame(format!("header {}: {}", name, e)))?,
                    )
                }
            }
            8 => {
                fixed(8, &*buf)?;
                HeaderValue::Timestamp(buf.get_i64())
            }
            9 => {
                fixed(16, &*buf)?;
                let mut uuid = [0u8; 16];
                buf.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(DecodeError::Frame(format!(
                    "unknown header value type {} for {}",
                    other, name
                )))
            }
        };
        headers.push((name, value));
    }
    Ok(headers)
}

/// Encode a frame; used by tests and mock upstreams.
pub fn encode_frame(headers: &[(&str, HeaderValue)], payload: &[u8]) -> Bytes {
    let mut header_buf = BytesMut::new();
    for (name, value) in headers {
        header_buf.put_u8(name.len() as u8);
        header_buf.put_slice(name.as_bytes());
        match value {
            HeaderValue::Bool(true) => header_buf.put_u8(0),
            HeaderValue::Bool(false) => header_buf.put_u8(1),
            HeaderValue::Byte(v) => {
                header_buf.put_u8(2);
                header_buf.put_i8(*v);
            }
            HeaderValue::Short(v) => {
                header_buf.put_u8(3);
                header_buf.put_i16(*v);
            }
            HeaderValue::Int(v) => {
                header_buf.put_u8(4);
                header_buf.put_i32(*v);
            }
            HeaderValue::Long(v) => {
                header_buf.put_u8(5);
                header_buf.put_i64(*v);
            }
            HeaderValue::Bytes(v) => {
                header_buf.put_u8(6);
                header_buf.put_u16(v.len() as u16);
                header_buf.put_slice(v);
            }
            HeaderValue::String(v) => {
                header_buf.put_u8(7);
                header_buf.put_u16(v.len() as u16);
                header_buf.put_slice(v.as_bytes());
            }
            HeaderValue::Timestamp(v) => {
                header_buf.put_u8(8);
                header_buf.put_i64(*v);
            }
            HeaderValue::Uuid(v) => {
                header_buf.put_u8(9);
                header_buf.put_slice(v);
            }
        }
    }

    let total_len = MIN_FRAME_LEN + header_buf.len() + payload.len();
    let mut out = BytesMut::with_capacity(total_len);
    out.put_u32(total_len as u32);
    out.put_u32(header_buf.len() as u32);
    let prelude_crc = crc32(&out[..8]);
    out.put_u32(prelude_crc);
    out.put_slice(&header_buf);
    out.put_slice(payload);
    let message_crc = crc32(&out);
    out.put_u32(message_crc);
    out.freeze()
}

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    bytes: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExceptionEnvelope {
    #[serde(default, alias = "Message")]
    message: Option<String>,
    #[serde(default, rename = "Code")]
    code: Option<String>,
    #[serde(default, rename = "__type")]
    error_type: Option<String>,
}

/// Pull decoder producing one [`StreamEvent`] per `event` frame.
pub struct EventStreamDecoder {
    inner: Option<BoxChunkStream<Bytes>>,
    buf: BytesMut,
    cancel: Option<CancellationToken>,
    done: bool,
}

impl EventStreamDecoder {
    pub fn new(inner: BoxChunkStream<Bytes>) -> Self {
        Self {
            inner: Some(inner),
            buf: BytesMut::new(),
            cancel: None,
            done: false,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.buf.len() >= PRELUDE_LEN {
                let total_len =
                    u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                        as usize;
                if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
                    return Err(DecodeError::Frame(format!("invalid frame length {}", total_len)).into());
                }
                if self.buf.len() >= total_len {
                    let raw = self.buf.split_to(total_len).freeze();
                    return Ok(Some(parse_frame(raw)?));
                }
            }

            let Some(inner) = self.inner.as_mut() else {
                return Ok(None);
            };
            let next = match &self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    next = inner.next() => next,
                },
                None => inner.next().await,
            };
            match next {
                Some(Ok(bytes)) => self.buf.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(e),
                None if self.buf.is_empty() => return Ok(None),
                None => return Err(DecodeError::Truncated(self.buf.len()).into()),
            }
        }
    }

    fn dispatch(frame: Frame) -> std::result::Result<StreamEvent, DecodeError> {
        let message_type = frame
            .header_str(HEADER_MESSAGE_TYPE)
            .ok_or(DecodeError::MissingHeader(HEADER_MESSAGE_TYPE))?;

        match message_type {
            "event" => {
                let event_type = frame
                    .header_str(HEADER_EVENT_TYPE)
                    .ok_or(DecodeError::MissingHeader(HEADER_EVENT_TYPE))?;
                if event_type != "chunk" {
                    debug!(event_type, "passing through non-chunk event frame");
                    return Ok(StreamEvent::new(event_type, frame.payload.clone()));
                }
                let envelope: ChunkEnvelope = serde_json::from_slice(&frame.payload)
                    .map_err(|e| DecodeError::Json(e.to_string()))?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(envelope.bytes.as_bytes())
                    .map_err(|e| DecodeError::Base64(e.to_string()))?;
                let value: serde_json::Value = serde_json::from_slice(&decoded)
                    .map_err(|e| DecodeError::Json(e.to_string()))?;
                let chunk_type = value
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(StreamEvent::new(chunk_type, decoded))
            }
            "exception" => {
                // Payload may be empty or not JSON at all.
                let envelope: ExceptionEnvelope = if frame.payload.is_empty() {
                    ExceptionEnvelope::default()
                } else {
                    serde_json::from_slice(&frame.payload).unwrap_or_default()
                };
                let code = frame
                    .header_str(HEADER_EXCEPTION_TYPE)
                    .map(str::to_string)
                    .or(envelope.code)
                    .or(envelope.error_type)
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                Err(DecodeError::Exception {
                    code,
                    message: envelope.message.unwrap_or_default(),
                })
            }
            "error" => Err(DecodeError::Remote {
                code: frame
                    .header_str(HEADER_ERROR_CODE)
                    .unwrap_or(UNKNOWN_ERROR)
                    .to_string(),
                message: frame
                    .header_str(HEADER_ERROR_MESSAGE)
                    .unwrap_or_default()
                    .to_string(),
            }),
            other => Err(DecodeError::UnknownMessageType(other.to_string())),
        }
    }
}

#[async_trait]
impl ChunkStream<StreamEvent> for EventStreamDecoder {
    async fn next(&mut self) -> Option<Result<StreamEvent>> {
        if self.done {
            return None;
        }
        if self.is_cancelled() {
            self.done = true;
            return Some(Err(Error::Cancelled));
        }

        let frame = match self.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        match Self::dispatch(frame) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.done = true;
        self.buf.clear();
        match self.inner.take() {
            Some(mut inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-32 (IEEE 802.3), as used by the frame prelude and trailer.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for byte in data {
        crc = CRC32_TABLE[((crc ^ *byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect, VecStream};
    use serde_json::json;

    fn chunk_frame(value: &serde_json::Value) -> Bytes {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(value).unwrap());
        encode_frame(
            &[
                (HEADER_MESSAGE_TYPE, HeaderValue::String("event".into())),
                (HEADER_EVENT_TYPE, HeaderValue::String("chunk".into())),
                (HEADER_CONTENT_TYPE, HeaderValue::String("application/json".into())),
            ],
            json!({ "bytes": encoded }).to_string().as_bytes(),
        )
    }

    fn decoder(chunks: Vec<Bytes>) -> EventStreamDecoder {
        EventStreamDecoder::new(Box::new(VecStream::new(chunks)))
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn frame_round_trips_all_header_types() {
        let headers = vec![
            ("t", HeaderValue::Bool(true)),
            ("f", HeaderValue::Bool(false)),
            ("b", HeaderValue::Byte(-3)),
            ("s", HeaderValue::Short(300)),
            ("i", HeaderValue::Int(70_000)),
            ("l", HeaderValue::Long(1 << 40)),
            ("raw", HeaderValue::Bytes(Bytes::from_static(b"\x00\x01"))),
            ("ts", HeaderValue::Timestamp(1_700_000_000_000)),
            ("id", HeaderValue::Uuid([7u8; 16])),
        ];
        let frame = parse_frame(encode_frame(&headers, b"payload")).unwrap();
        assert_eq!(frame.payload.as_ref(), b"payload");
        assert_eq!(frame.headers.len(), headers.len());
        assert_eq!(frame.header("l"), Some(&HeaderValue::Long(1 << 40)));
    }

    #[test]
    fn corrupted_frame_fails_checksum() {
        let mut raw = encode_frame(&[], b"abc").to_vec();
        let last = raw.len() - 5;
        raw[last] ^= 0xFF;
        let err = parse_frame(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, DecodeError::Checksum { section: "message", .. }));
    }

    #[tokio::test]
    async fn chunk_event_yields_provider_type() {
        let frame = chunk_frame(&json!({"type": "message_start", "message": {"id": "msg_1"}}));
        // Split the frame across reads to exercise buffering.
        let (a, b) = frame.split_at(10);
        let events = collect(Box::new(decoder(vec![
            Bytes::copy_from_slice(a),
            Bytes::copy_from_slice(b),
        ])))
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "message_start");
        let value: serde_json::Value = serde_json::from_slice(&events[0].data).unwrap();
        assert_eq!(value["message"]["id"], "msg_1");
    }

    #[tokio::test]
    async fn non_chunk_event_passes_through() {
        let frame = encode_frame(
            &[
                (HEADER_MESSAGE_TYPE, HeaderValue::String("event".into())),
                (HEADER_EVENT_TYPE, HeaderValue::String("metadata".into())),
            ],
            br#"{"latencyMs":12}"#,
        );
        let events = collect(Box::new(decoder(vec![frame]))).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "metadata");
        assert_eq!(events[0].data.as_ref(), br#"{"latencyMs":12}"#);
    }

    #[tokio::test]
    async fn exception_uses_type_when_code_missing() {
        let frame = encode_frame(
            &[(HEADER_MESSAGE_TYPE, HeaderValue::String("exception".into()))],
            br#"{"__type":"ThrottlingException","message":"Too many requests"}"#,
        );
        let mut stream = decoder(vec![frame]);
        let err = stream.next().await.unwrap().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("received exception ThrottlingException: Too many requests"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn exception_header_takes_precedence() {
        let frame = encode_frame(
            &[
                (HEADER_MESSAGE_TYPE, HeaderValue::String("exception".into())),
                (
                    HEADER_EXCEPTION_TYPE,
                    HeaderValue::String("ModelStreamErrorException".into()),
                ),
            ],
            br#"{"Code":"Other","Message":"boom"}"#,
        );
        let err = decoder(vec![frame]).next().await.unwrap().unwrap_err();
        assert!(err
            .to_string()
            .contains("received exception ModelStreamErrorException: boom"));
    }

    #[tokio::test]
    async fn exception_with_empty_payload() {
        let frame = encode_frame(
            &[(HEADER_MESSAGE_TYPE, HeaderValue::String("exception".into()))],
            b"",
        );
        let err = decoder(vec![frame]).next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("received exception UnknownError: "));
    }

    #[tokio::test]
    async fn error_frame_uses_headers() {
        let frame = encode_frame(
            &[
                (HEADER_MESSAGE_TYPE, HeaderValue::String("error".into())),
                (HEADER_ERROR_CODE, HeaderValue::String("InternalFailure".into())),
                (HEADER_ERROR_MESSAGE, HeaderValue::String("oops".into())),
            ],
            b"",
        );
        let err = decoder(vec![frame]).next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("received error InternalFailure: oops"));
    }

    #[tokio::test]
    async fn unknown_message_type_is_terminal() {
        let good = chunk_frame(&json!({"type": "ping"}));
        let bad = encode_frame(
            &[(HEADER_MESSAGE_TYPE, HeaderValue::String("mystery".into()))],
            b"",
        );
        let mut stream = decoder(vec![bad, good]);
        assert!(matches!(
            stream.next().await,
            Some(Err(Error::Decode(DecodeError::UnknownMessageType(_))))
        ));
        assert!(stream.next().await.is_none());
        stream.close().await.unwrap();
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn bad_base64_is_terminal() {
        let frame = encode_frame(
            &[
                (HEADER_MESSAGE_TYPE, HeaderValue::String("event".into())),
                (HEADER_EVENT_TYPE, HeaderValue::String("chunk".into())),
            ],
            br#"{"bytes":"***"}"#,
        );
        assert!(matches!(
            decoder(vec![frame]).next().await,
            Some(Err(Error::Decode(DecodeError::Base64(_))))
        ));
    }

    #[tokio::test]
    async fn truncated_stream_errors() {
        let frame = chunk_frame(&json!({"type": "ping"}));
        let partial = frame.slice(..frame.len() - 3);
        assert!(matches!(
            decoder(vec![partial]).next().await,
            Some(Err(Error::Decode(DecodeError::Truncated(_))))
        ));
    }

    #[tokio::test]
    async fn cancelled_before_read() {
        let token = CancellationToken::new();
        token.cancel();
        let mut stream = decoder(vec![chunk_frame(&json!({"type": "ping"}))])
            .with_cancellation(token);
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
    }
}
