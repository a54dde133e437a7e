//! Server-sent events codec.
//!
//! The decoder buffers bytes and emits one [`StreamEvent`] per complete frame
//! (frames end with a blank line). `[DONE]` frames are passed through as
//! ordinary events; it is up to the outbound transformer to interpret them.

use crate::stream::{BoxChunkStream, ChunkStream};
use crate::types::StreamEvent;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// SSE decoder over a byte stream.
pub struct SseDecoder {
    inner: BoxChunkStream<Bytes>,
    buf: String,
    last_event_id: Option<String>,
    eof: bool,
}

impl SseDecoder {
    pub fn new(inner: BoxChunkStream<Bytes>) -> Self {
        Self {
            inner,
            buf: String::new(),
            last_event_id: None,
            eof: false,
        }
    }

    pub fn boxed(inner: BoxChunkStream<Bytes>) -> BoxChunkStream<StreamEvent> {
        Box::new(Self::new(inner))
    }

    /// Split the next complete frame off the buffer.
    fn take_frame(&mut self) -> Option<String> {
        let (idx, delimiter_len) = find_delimiter(&self.buf)?;
        let frame = self.buf[..idx].to_string();
        self.buf.drain(..idx + delimiter_len);
        Some(frame)
    }

    fn parse_frame(&mut self, frame: &str) -> Option<StreamEvent> {
        let mut event_type = String::new();
        let mut data: Vec<&str> = Vec::new();

        for line in frame.lines() {
            let line = line.trim_end_matches('\r');
            // Ignore SSE comment lines
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event_type = value.to_string(),
                "data" => data.push(value),
                "id" => self.last_event_id = Some(value.to_string()),
                _ => {}
            }
        }

        if data.is_empty() {
            return None;
        }
        Some(StreamEvent {
            last_event_id: self.last_event_id.clone(),
            event_type,
            data: Bytes::from(data.join("\n")),
        })
    }
}

fn find_delimiter(buf: &str) -> Option<(usize, usize)> {
    let lf = buf.find("\n\n").map(|i| (i, 2));
    let crlf = buf.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[async_trait]
impl ChunkStream<StreamEvent> for SseDecoder {
    async fn next(&mut self) -> Option<Result<StreamEvent>> {
        loop {
            if let Some(frame) = self.take_frame() {
                match self.parse_frame(&frame) {
                    Some(event) => return Some(Ok(event)),
                    None => continue,
                }
            }

            if self.eof {
                // EOF: flush whatever is left once.
                if self.buf.trim().is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut self.buf);
                return self.parse_frame(&rest).map(Ok);
            }

            // Need more data.
            match self.inner.next().await {
                Some(Ok(bytes)) => self.buf.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(e)) => {
                    self.eof = true;
                    self.buf.clear();
                    return Some(Err(e));
                }
                None => self.eof = true,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.eof = true;
        self.buf.clear();
        self.inner.close().await
    }
}

/// Render an event as one SSE frame.
pub fn encode_event(event: &StreamEvent) -> Bytes {
    let mut out = Vec::with_capacity(event.data.len() + event.event_type.len() + 16);
    if let Some(id) = &event.last_event_id {
        out.extend_from_slice(b"id: ");
        out.extend_from_slice(id.as_bytes());
        out.push(b'\n');
    }
    if !event.event_type.is_empty() {
        out.extend_from_slice(b"event: ");
        out.extend_from_slice(event.event_type.as_bytes());
        out.push(b'\n');
    }
    for line in event.data.split(|b| *b == b'\n') {
        out.extend_from_slice(b"data: ");
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    out.push(b'\n');
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect, VecStream};

    fn decode(chunks: Vec<&'static str>) -> BoxChunkStream<StreamEvent> {
        let bytes: Vec<Bytes> = chunks
            .into_iter()
            .map(|s| Bytes::from_static(s.as_bytes()))
            .collect();
        SseDecoder::boxed(Box::new(VecStream::new(bytes)))
    }

    #[tokio::test]
    async fn frames_split_across_reads() {
        let events = collect(decode(vec![
            "event: message_start\ndata: {\"a\"",
            ":1}\n\nid: 7\ndata: {\"b\":2}\r\n\r\n",
            ": keep-alive\n\n",
            "data: [DONE]",
        ]))
        .await
        .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "message_start");
        assert_eq!(events[0].data_str(), "{\"a\":1}");
        assert_eq!(events[1].last_event_id.as_deref(), Some("7"));
        assert_eq!(events[1].data_str(), "{\"b\":2}");
        assert!(events[2].is_done());
    }

    #[tokio::test]
    async fn multi_line_data_is_joined() {
        let events = collect(decode(vec!["data: line1\ndata: line2\n\n"]))
            .await
            .unwrap();
        assert_eq!(events[0].data_str(), "line1\nline2");
    }

    #[test]
    fn encode_frames_event_and_data() {
        let event = StreamEvent::new("ping", Bytes::from_static(b"{}"));
        assert_eq!(encode_event(&event).as_ref(), b"event: ping\ndata: {}\n\n");
        assert_eq!(encode_event(&StreamEvent::done()).as_ref(), b"data: [DONE]\n\n");
    }
}
