//! # Types Module
//!
//! The unified model every transformer converges on. The shapes follow the
//! OpenAI chat-completions layout because it is the lowest common denominator
//! among the supported dialects.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Request`] | Canonical chat request |
//! | [`Response`] | Terminal response or streamed chunk |
//! | [`Message`] | Chat message with string or part-list content |
//! | [`ToolCall`] | Function call emitted by a model |
//! | [`StreamEvent`] | Wire event exchanged with executors and clients |
//!
//! ## Example
//!
//! ```rust
//! use axonhub::types::{Message, Request};
//!
//! let request = Request::new("gpt-4", vec![Message::user("Hi")]).with_stream(true);
//! assert!(request.is_stream());
//! ```

pub mod events;
pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use events::StreamEvent;
pub use message::{ContentPart, ImageUrl, Message, MessageContent, Role};
pub use request::Request;
pub use response::{Choice, Delta, Response, Usage};
pub use tool::{FunctionCall, FunctionDefinition, Tool, ToolCall};
