//! # switchboard-common
//!
//! Data model shared by every switchboard crate.
//!
//! The entities form a strict ownership tree:
//!
//! ```text
//! Conversation ─┬─ Turn ─┬─ ModelResponse ─┬─ ToolInvocation ─┬─ LogEntry
//!               │        │                 │                  └─ ...
//!               │        │                 └─ ...
//!               │        └─ ...
//!               └─ ...
//! ```
//!
//! Alongside the entities this crate defines the types that cross the model
//! boundary ([`ModelRequest`], [`ModelReply`]) and the tool catalogue and
//! outcome types used by tool providers ([`ToolSpec`], [`ToolOutcome`]).
//!
//! ## Example
//!
//! ```
//! use switchboard_common::{Conversation, InvocationStatus, ToolInvocation, Turn};
//! use uuid::Uuid;
//!
//! let conversation = Conversation::new(Uuid::new_v4());
//! let turn = Turn::user(conversation.id, "what's the weather in Paris");
//! assert!(turn.is_awaiting_completion());
//!
//! let mut invocation = ToolInvocation::pending(
//!     Uuid::new_v4(),
//!     "toolu_01",
//!     "weather.current",
//!     serde_json::json!({"city": "Paris"}),
//! );
//! assert_eq!(invocation.provider_key(), "weather");
//! assert!(invocation.transition(InvocationStatus::Processing));
//! assert!(!invocation.transition(InvocationStatus::Queued));
//! ```

/// Conversations, turns and message content.
pub mod conversation;
/// Tool invocations, their lifecycle and log trail.
pub mod invocation;
/// Request and reply types for the model boundary.
pub mod model;
/// Recorded model responses.
pub mod response;
/// Tool catalogue entries and execution outcomes.
pub mod tools;

pub use conversation::{
    ContentBlock, ContentBlocks, Conversation, DEFAULT_TURN_ERROR, MessageContent, Role, Turn,
};
pub use invocation::{InvocationStatus, LogEntry, LogLevel, Settlement, ToolInvocation};
pub use model::{HistoryItem, ModelReply, ModelRequest};
pub use response::{ModelResponse, StopReason, Usage};
pub use tools::{QUALIFIED_SEPARATOR, ToolFailure, ToolOutcome, ToolSpec, qualify, split_qualified};
