//! Unified deltas → UI data-stream events.
//!
//! At most one of {text, reasoning, tool} block is open at any time. Opening a
//! block emits `start-step` followed by its `*-start`; closing emits the
//! matching end (`*-end`, or `tool-input-available` for each accumulated
//! call) followed by `finish-step`.
//!
//! The first `finish_reason` closes every block; `finish` itself is held
//! until the source is exhausted so a trailing usage-only chunk still lands
//! in its metadata.

use super::UiEvent;
use crate::stream::Converter;
use crate::types::tool::parse_arguments;
use crate::types::{Response, StreamEvent, ToolCall, Usage};
use crate::Result;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn fresh_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone)]
struct ActiveToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Forward state machine, driven by [`ConvertStream`](crate::stream::ConvertStream).
#[derive(Debug, Default)]
pub struct DataStreamEncoder {
    started: bool,
    finished: bool,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    text_open: bool,
    reasoning_open: bool,
    tool_open: bool,
    text_id: String,
    reasoning_id: String,
    /// Accumulated calls of the open tool block, in first-seen order.
    active_tool_calls: Vec<ActiveToolCall>,
    /// Stream index → call id; later fragments only carry the index.
    tool_index_ids: HashMap<u32, String>,
    out: Vec<UiEvent>,
}

impl DataStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, event: UiEvent) {
        self.out.push(event);
    }

    fn ensure_started(&mut self, message_id: &str) {
        if self.started {
            return;
        }
        self.started = true;
        let message_id = if message_id.is_empty() {
            fresh_id("msg")
        } else {
            message_id.to_string()
        };
        self.emit(UiEvent::Start {
            message_id: Some(message_id),
        });
    }

    fn close_text(&mut self) {
        if !self.text_open {
            return;
        }
        self.text_open = false;
        let id = std::mem::take(&mut self.text_id);
        self.emit(UiEvent::TextEnd { id });
        self.emit(UiEvent::FinishStep);
    }

    fn close_reasoning(&mut self) {
        if !self.reasoning_open {
            return;
        }
        self.reasoning_open = false;
        let id = std::mem::take(&mut self.reasoning_id);
        self.emit(UiEvent::ReasoningEnd { id });
        self.emit(UiEvent::FinishStep);
    }

    fn close_tool(&mut self) {
        if !self.tool_open {
            return;
        }
        self.tool_open = false;
        for call in std::mem::take(&mut self.active_tool_calls) {
            self.emit(UiEvent::ToolInputAvailable {
                tool_call_id: call.id,
                tool_name: call.name,
                input: parse_arguments(&call.arguments),
            });
        }
        self.tool_index_ids.clear();
        self.emit(UiEvent::FinishStep);
    }

    fn close_all(&mut self) {
        self.close_reasoning();
        self.close_text();
        self.close_tool();
    }

    fn on_reasoning(&mut self, delta: &str) {
        self.close_tool();
        self.close_text();
        if !self.reasoning_open {
            self.reasoning_open = true;
            self.reasoning_id = fresh_id("reasoning");
            self.emit(UiEvent::StartStep);
            self.emit(UiEvent::ReasoningStart {
                id: self.reasoning_id.clone(),
            });
        }
        self.emit(UiEvent::ReasoningDelta {
            id: self.reasoning_id.clone(),
            delta: delta.to_string(),
        });
    }

    fn on_text(&mut self, delta: &str) {
        self.close_tool();
        self.close_reasoning();
        if !self.text_open {
            self.text_open = true;
            self.text_id = fresh_id("text");
            self.emit(UiEvent::StartStep);
            self.emit(UiEvent::TextStart {
                id: self.text_id.clone(),
            });
        }
        self.emit(UiEvent::TextDelta {
            id: self.text_id.clone(),
            delta: delta.to_string(),
        });
    }

    fn resolve_call_id(&mut self, call: &ToolCall) -> String {
        if !call.id.is_empty() {
            if let Some(index) = call.index {
                self.tool_index_ids.insert(index, call.id.clone());
            }
            return call.id.clone();
        }
        if let Some(id) = call.index.and_then(|i| self.tool_index_ids.get(&i)) {
            return id.clone();
        }
        match self.active_tool_calls.last() {
            Some(last) => last.id.clone(),
            None => {
                let id = fresh_id("call");
                if let Some(index) = call.index {
                    self.tool_index_ids.insert(index, id.clone());
                }
                id
            }
        }
    }

    fn on_tool_fragment(&mut self, call: &ToolCall) {
        self.close_text();
        self.close_reasoning();
        if !self.tool_open {
            self.tool_open = true;
            self.emit(UiEvent::StartStep);
        }

        let id = self.resolve_call_id(call);
        let pos = match self.active_tool_calls.iter().position(|c| c.id == id) {
            Some(pos) => pos,
            None => {
                self.active_tool_calls.push(ActiveToolCall {
                    id: id.clone(),
                    name: call.function.name.clone(),
                    arguments: String::new(),
                });
                self.emit(UiEvent::ToolInputStart {
                    tool_call_id: id.clone(),
                    tool_name: call.function.name.clone(),
                });
                self.active_tool_calls.len() - 1
            }
        };

        let fragment = &call.function.arguments;
        if !fragment.is_empty() {
            self.active_tool_calls[pos].arguments.push_str(fragment);
            self.emit(UiEvent::ToolInputDelta {
                tool_call_id: id,
                input_text_delta: fragment.clone(),
            });
        }
    }

    fn on_complete_tool_call(&mut self, call: &ToolCall) {
        self.close_text();
        self.close_reasoning();
        self.emit(UiEvent::ToolInputAvailable {
            tool_call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            input: call.parsed_arguments(),
        });
    }

    fn on_finish(&mut self, reason: &str) {
        self.close_all();
        self.finish_reason = Some(reason.to_string());
        self.finished = true;
    }

    fn emit_finish(&mut self) {
        let Some(reason) = self.finish_reason.take() else {
            return;
        };
        let mut metadata = json!({"finishReason": reason});
        if let Some(usage) = &self.usage {
            metadata["usage"] = json!({
                "promptTokens": usage.prompt_tokens,
                "completionTokens": usage.completion_tokens,
                "totalTokens": usage.total_tokens,
            });
        }
        self.emit(UiEvent::Finish {
            message_metadata: Some(metadata),
        });
    }

    fn has_content(chunk: &Response) -> bool {
        chunk.choices.iter().any(|choice| {
            choice.finish_reason.is_some()
                || choice.message.is_some()
                || choice.delta.as_ref().is_some_and(|d| {
                    d.content.as_ref().is_some_and(|s| !s.is_empty())
                        || d.reasoning_content.as_ref().is_some_and(|s| !s.is_empty())
                        || !d.tool_calls.is_empty()
                })
        })
    }

    fn step(&mut self, chunk: &Response) {
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        // Upstream `[DONE]` is ignored; the sentinel is appended in `finish`.
        if self.finished || chunk.is_done() || !Self::has_content(chunk) {
            return;
        }
        self.ensure_started(&chunk.id);

        for choice in &chunk.choices {
            if let Some(delta) = &choice.delta {
                if let Some(reasoning) = delta.reasoning_content.as_deref().filter(|s| !s.is_empty()) {
                    self.on_reasoning(reasoning);
                }
                if let Some(text) = delta.content.as_deref().filter(|s| !s.is_empty()) {
                    self.on_text(text);
                }
                for call in &delta.tool_calls {
                    self.on_tool_fragment(call);
                }
            }
            if let Some(message) = &choice.message {
                if let Some(reasoning) = message.reasoning_content.as_deref().filter(|s| !s.is_empty()) {
                    self.on_reasoning(reasoning);
                }
                let text = message.text();
                if !text.is_empty() {
                    self.on_text(&text);
                }
                for call in &message.tool_calls {
                    self.on_complete_tool_call(call);
                }
            }
            if let Some(reason) = &choice.finish_reason {
                if !self.finished {
                    self.on_finish(reason);
                }
                break;
            }
        }
    }

    fn drain(&mut self) -> Result<Vec<StreamEvent>> {
        std::mem::take(&mut self.out)
            .iter()
            .map(UiEvent::to_stream_event)
            .collect()
    }
}

impl Converter<Response, StreamEvent> for DataStreamEncoder {
    fn convert(&mut self, chunk: Response) -> Result<Vec<StreamEvent>> {
        self.step(&chunk);
        self.drain()
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        self.close_all();
        self.emit_finish();
        let mut events = self.drain()?;
        events.push(StreamEvent::done());
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect, BoxChunkStream, ConvertStream, VecStream};
    use crate::transformer::data_stream::aggregate::aggregate_events;
    use crate::transformer::data_stream::UiEvent;
    use crate::types::Delta;
    use serde_json::Value;
    use std::collections::HashSet;

    fn encode(chunks: Vec<Response>) -> Vec<StreamEvent> {
        let mut encoder = DataStreamEncoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(encoder.convert(chunk).unwrap());
        }
        events.extend(encoder.finish().unwrap());
        events
    }

    fn run(chunks: Vec<Response>) -> Vec<Value> {
        encode(chunks)
            .iter()
            .map(|e| {
                if e.is_done() {
                    json!("[DONE]")
                } else {
                    serde_json::from_slice(&e.data).unwrap()
                }
            })
            .collect()
    }

    fn types(events: &[Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap_or("[DONE]").to_string())
            .collect()
    }

    #[test]
    fn reasoning_then_text_switches_blocks() {
        let events = run(vec![
            Response::chunk("c1", "m").with_delta(Delta::reasoning("think")),
            Response::chunk("c1", "m").with_delta(Delta::text("answer")),
            Response::chunk("c1", "m").with_finish_reason("stop"),
        ]);
        assert_eq!(
            types(&events),
            vec![
                "start",
                "start-step",
                "reasoning-start",
                "reasoning-delta",
                "reasoning-end",
                "finish-step",
                "start-step",
                "text-start",
                "text-delta",
                "text-end",
                "finish-step",
                "finish",
                "[DONE]",
            ]
        );
        assert_eq!(events[0]["messageId"], "c1");
        assert_eq!(events[11]["messageMetadata"]["finishReason"], "stop");
    }

    #[test]
    fn tool_fragments_accumulate_by_index() {
        let mut first = ToolCall::new("call_1", "weather", "");
        first.index = Some(0);
        let mut second = ToolCall::new("", "", "{\"location\":");
        second.index = Some(0);
        let mut third = ToolCall::new("", "", "\"SF\"}");
        third.index = Some(0);

        let events = run(vec![
            Response::chunk("c1", "m").with_delta(Delta::tool_call(first)),
            Response::chunk("c1", "m").with_delta(Delta::tool_call(second)),
            Response::chunk("c1", "m").with_delta(Delta::tool_call(third)),
            Response::chunk("c1", "m").with_finish_reason("tool_calls"),
        ]);
        assert_eq!(
            types(&events),
            vec![
                "start",
                "start-step",
                "tool-input-start",
                "tool-input-delta",
                "tool-input-delta",
                "tool-input-available",
                "finish-step",
                "finish",
                "[DONE]",
            ]
        );
        assert_eq!(events[5]["toolCallId"], "call_1");
        assert_eq!(events[5]["input"], json!({"location": "SF"}));
    }

    #[test]
    fn unfinished_stream_still_closes_and_terminates() {
        let events = run(vec![Response::chunk("c1", "m").with_delta(Delta::text("partial"))]);
        assert_eq!(
            types(&events),
            vec!["start", "start-step", "text-start", "text-delta", "text-end", "finish-step", "[DONE]"]
        );
    }

    #[tokio::test]
    async fn empty_stream_yields_only_sentinel() {
        let source: BoxChunkStream<Response> = Box::new(VecStream::new(vec![Response::done()]));
        let events = collect(ConvertStream::boxed(source, DataStreamEncoder::new()))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_done());
    }

    fn fragment(index: u32, id: &str, name: &str, arguments: &str) -> ToolCall {
        let mut call = ToolCall::new(id, name, arguments);
        call.index = Some(index);
        call
    }

    fn mixed_chunks(reason: &str) -> Vec<Response> {
        let chunk = || Response::chunk("c1", "m");
        let mut chunks = vec![
            chunk().with_delta(Delta::reasoning("Let me")),
            chunk().with_delta(Delta::reasoning(" check ü")),
            chunk().with_delta(Delta::text("Checking ")),
            chunk().with_delta(Delta::text("the weather.")),
        ];
        if reason == "tool_calls" {
            chunks.extend([
                chunk().with_delta(Delta::tool_call(fragment(0, "call_1", "weather", ""))),
                chunk().with_delta(Delta::tool_call(fragment(0, "", "", "{\"location\":"))),
                chunk().with_delta(Delta::tool_call(fragment(1, "call_2", "time", "{}"))),
                chunk().with_delta(Delta::tool_call(fragment(0, "", "", "\"SF\"}"))),
            ]);
        }
        chunks.push(chunk().with_delta(Delta::reasoning("then answer")));
        chunks.push(chunk().with_delta(Delta::text(" Sunny\n")));
        chunks.push(chunk().with_finish_reason(reason));
        chunks
    }

    /// No delta after its block ended, and at most one block open at a time.
    fn assert_well_ordered(events: &[StreamEvent]) {
        let mut open: Option<&'static str> = None;
        let mut open_ids: HashSet<String> = HashSet::new();
        let mut ended: HashSet<String> = HashSet::new();
        for event in events {
            let Some(event) = UiEvent::parse(event).unwrap() else {
                continue;
            };
            match event {
                UiEvent::TextStart { id } | UiEvent::ReasoningStart { id } => {
                    assert!(open.is_none(), "block opened while {open:?} is open");
                    open = Some("content");
                    open_ids.insert(id);
                }
                UiEvent::TextDelta { id, .. } | UiEvent::ReasoningDelta { id, .. } => {
                    assert!(!ended.contains(&id), "delta after end for {id}");
                    assert!(open_ids.contains(&id), "delta for unopened {id}");
                }
                UiEvent::TextEnd { id } | UiEvent::ReasoningEnd { id } => {
                    assert!(open_ids.remove(&id));
                    ended.insert(id);
                    open = None;
                }
                UiEvent::ToolInputStart { tool_call_id, .. } => {
                    assert!(open.is_none() || open == Some("tool"));
                    open = Some("tool");
                    open_ids.insert(tool_call_id);
                }
                UiEvent::ToolInputDelta { tool_call_id, .. } => {
                    assert!(!ended.contains(&tool_call_id));
                    assert!(open_ids.contains(&tool_call_id));
                }
                UiEvent::ToolInputAvailable { tool_call_id, .. } => {
                    open_ids.remove(&tool_call_id);
                    ended.insert(tool_call_id);
                }
                UiEvent::FinishStep => {
                    if open == Some("tool") {
                        open = None;
                    }
                    assert!(open.is_none(), "step finished with a block open");
                }
                _ => {}
            }
        }
        assert!(open_ids.is_empty());
    }

    fn joined(message: &Value, part_type: &str) -> String {
        message["parts"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|p| p["type"] == part_type)
            .map(|p| p["text"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn encode_then_aggregate_reconstructs_content() {
        for reason in ["stop", "tool_calls"] {
            let events = encode(mixed_chunks(reason));
            assert_well_ordered(&events);

            let (message, meta) = aggregate_events(&events).unwrap();
            assert_eq!(joined(&message, "reasoning"), "Let me check üthen answer", "{reason}");
            assert_eq!(joined(&message, "text"), "Checking the weather. Sunny\n", "{reason}");
            assert_eq!(meta.finish_reason.as_deref(), Some(reason));
            assert_eq!(meta.id.as_deref(), Some("c1"));
        }
    }

    #[test]
    fn interleaved_tool_calls_keep_their_arguments() {
        let events = run(mixed_chunks("tool_calls"));
        let available: Vec<&Value> = events
            .iter()
            .filter(|e| e["type"] == "tool-input-available")
            .collect();
        assert_eq!(available.len(), 2);
        assert_eq!(available[0]["toolCallId"], "call_1");
        assert_eq!(available[0]["input"], json!({"location": "SF"}));
        assert_eq!(available[1]["toolCallId"], "call_2");
        assert_eq!(available[1]["input"], json!({}));
    }

    #[test]
    fn trailing_usage_chunk_reaches_finish_metadata() {
        let mut usage_only = Response::chunk("c1", "m");
        usage_only.usage = Some(Usage::new(5, 7));
        let events = run(vec![
            Response::chunk("c1", "m").with_delta(Delta::text("Hi")),
            Response::chunk("c1", "m").with_finish_reason("stop"),
            usage_only,
        ]);
        let finish = &events[events.len() - 2];
        assert_eq!(finish["type"], "finish");
        assert_eq!(finish["messageMetadata"]["finishReason"], "stop");
        assert_eq!(finish["messageMetadata"]["usage"]["totalTokens"], 12);
    }
}
