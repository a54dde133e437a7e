//! Unified chat response and streaming chunk.

use serde::{Deserialize, Serialize};

use super::message::{Message, Role};
use super::tool::ToolCall;

pub const OBJECT_COMPLETION: &str = "chat.completion";
pub const OBJECT_CHUNK: &str = "chat.completion.chunk";
pub const OBJECT_DONE: &str = "[DONE]";

/// A full response (`chat.completion`) or one streamed chunk
/// (`chat.completion.chunk`). The `[DONE]` object marks the end of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Response {
    pub fn done() -> Self {
        Self {
            id: String::new(),
            object: OBJECT_DONE.to_string(),
            created: 0,
            model: String::new(),
            choices: Vec::new(),
            usage: None,
        }
    }

    pub fn chunk(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: OBJECT_CHUNK.to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            choices: Vec::new(),
            usage: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.object == OBJECT_DONE
    }

    pub fn with_delta(mut self, delta: Delta) -> Self {
        self.choices.push(Choice {
            index: 0,
            message: None,
            delta: Some(delta),
            finish_reason: None,
        });
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        match self.choices.first_mut() {
            Some(choice) => choice.finish_reason = Some(reason.into()),
            None => self.choices.push(Choice {
                index: 0,
                message: None,
                delta: Some(Delta::default()),
                finish_reason: Some(reason.into()),
            }),
        }
        self
    }
}

/// One choice; terminal responses carry `message`, chunks carry `delta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental assistant output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Delta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning_content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            tool_calls: vec![call],
            ..Default::default()
        }
    }
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}
