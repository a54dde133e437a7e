//! UI data-stream events → one assistant message, for persistence.

use super::UiEvent;
use crate::transformer::AggregateMeta;
use crate::types::{StreamEvent, Usage};
use crate::Result;
use serde_json::{json, Value};

#[derive(PartialEq)]
enum Kind {
    Text,
    Reasoning,
}

impl Kind {
    fn part_type(&self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Reasoning => "reasoning",
        }
    }
}

struct Open {
    kind: Kind,
    text: String,
}

fn flush(open: &mut Option<Open>, parts: &mut Vec<Value>) {
    if let Some(block) = open.take() {
        parts.push(json!({"type": block.kind.part_type(), "text": block.text}));
    }
}

fn append(open: &mut Option<Open>, parts: &mut Vec<Value>, kind: Kind, delta: &str) {
    if open.as_ref().is_some_and(|o| o.kind != kind) {
        flush(open, parts);
    }
    open.get_or_insert_with(|| Open {
        kind,
        text: String::new(),
    })
    .text
    .push_str(delta);
}

/// Single pass over the emitted events.
///
/// `*-start` opens an accumulator, `*-delta` appends, `*-end` flushes one
/// part. A block still open at the end is flushed, not dropped. Tool input
/// events are not folded into the message.
pub fn aggregate_events(events: &[StreamEvent]) -> Result<(Value, AggregateMeta)> {
    let mut parts = Vec::new();
    let mut open: Option<Open> = None;
    let mut meta = AggregateMeta::default();

    for event in events {
        let Some(event) = UiEvent::parse(event)? else {
            continue;
        };
        match event {
            UiEvent::Start { message_id } => meta.id = message_id,
            UiEvent::TextStart { .. } => {
                flush(&mut open, &mut parts);
                open = Some(Open {
                    kind: Kind::Text,
                    text: String::new(),
                });
            }
            UiEvent::ReasoningStart { .. } => {
                flush(&mut open, &mut parts);
                open = Some(Open {
                    kind: Kind::Reasoning,
                    text: String::new(),
                });
            }
            UiEvent::TextDelta { delta, .. } => append(&mut open, &mut parts, Kind::Text, &delta),
            UiEvent::ReasoningDelta { delta, .. } => {
                append(&mut open, &mut parts, Kind::Reasoning, &delta)
            }
            UiEvent::TextEnd { .. } | UiEvent::ReasoningEnd { .. } => {
                flush(&mut open, &mut parts)
            }
            UiEvent::Finish { message_metadata } => {
                if let Some(metadata) = message_metadata {
                    meta.finish_reason = metadata["finishReason"].as_str().map(str::to_string);
                    if let Some(usage) = metadata.get("usage") {
                        meta.usage = Some(Usage::new(
                            usage["promptTokens"].as_u64().unwrap_or(0),
                            usage["completionTokens"].as_u64().unwrap_or(0),
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    flush(&mut open, &mut parts);

    let message = json!({
        "id": meta.id.clone().unwrap_or_default(),
        "role": "assistant",
        "parts": parts,
    });
    Ok((message, meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(value: Value) -> StreamEvent {
        StreamEvent::new("", serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn folds_blocks_into_parts() {
        let events = vec![
            ev(json!({"type": "start", "messageId": "m1"})),
            ev(json!({"type": "start-step"})),
            ev(json!({"type": "reasoning-start", "id": "r"})),
            ev(json!({"type": "reasoning-delta", "id": "r", "delta": "hm"})),
            ev(json!({"type": "reasoning-end", "id": "r"})),
            ev(json!({"type": "finish-step"})),
            ev(json!({"type": "start-step"})),
            ev(json!({"type": "text-start", "id": "t"})),
            ev(json!({"type": "text-delta", "id": "t", "delta": "Hel"})),
            ev(json!({"type": "text-delta", "id": "t", "delta": "lo"})),
            ev(json!({"type": "text-end", "id": "t"})),
            ev(json!({"type": "finish-step"})),
            ev(json!({"type": "finish", "messageMetadata": {"finishReason": "stop"}})),
            StreamEvent::done(),
        ];
        let (message, meta) = aggregate_events(&events).unwrap();
        assert_eq!(
            message,
            json!({"id": "m1", "role": "assistant", "parts": [
                {"type": "reasoning", "text": "hm"},
                {"type": "text", "text": "Hello"},
            ]})
        );
        assert_eq!(meta.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn trailing_open_block_is_flushed() {
        let events = vec![
            ev(json!({"type": "text-start", "id": "t"})),
            ev(json!({"type": "text-delta", "id": "t", "delta": "cut"})),
        ];
        let (message, _) = aggregate_events(&events).unwrap();
        assert_eq!(message["parts"][0]["text"], "cut");
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(aggregate_events(&[StreamEvent::new("", "{not json")]).is_err());
    }
}
