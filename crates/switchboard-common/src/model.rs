//! Types crossing the model provider boundary.
//!
//! The orchestrator sends a [`ModelRequest`] holding the system prompt, the
//! replayed history and the tool catalogue, and gets back a [`ModelReply`].
//! Transport details (retries, wire formats) belong to the client
//! implementation.

use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use typed_builder::TypedBuilder;

use crate::conversation::{ContentBlock, ContentBlocks, MessageContent, Role};
use crate::response::{StopReason, Usage};
use crate::tools::ToolSpec;

/// One replayed entry of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Author role.
    pub role: Role,
    /// Body.
    pub content: MessageContent,
}

impl HistoryItem {
    /// Creates a history entry.
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request sent to the model for one round trip.
///
/// # Examples
///
/// ```
/// use switchboard_common::{HistoryItem, ModelRequest, Role};
///
/// let request = ModelRequest::builder()
///     .system("Be brief.")
///     .messages(vec![HistoryItem::new(Role::User, "hello")])
///     .max_tokens(256)
///     .build();
/// assert!(request.tools.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ModelRequest {
    /// Model override; the client default is used when absent.
    #[builder(default, setter(strip_option, into))]
    pub model: Option<String>,
    /// System prompt.
    #[builder(default, setter(strip_option, into))]
    pub system: Option<String>,
    /// Ordered history.
    pub messages: Vec<HistoryItem>,
    /// Tool catalogue with qualified names.
    #[builder(default)]
    pub tools: Vec<ToolSpec>,
    /// Generation limit override.
    #[builder(default, setter(strip_option))]
    pub max_tokens: Option<u32>,
}

/// Reply returned by the model for one round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    /// Provider response identity.
    pub id: String,
    /// Model that answered.
    pub model: String,
    /// Author role.
    pub role: Role,
    /// Ordered content blocks.
    pub content: ContentBlocks,
    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,
    /// Matched stop sequence.
    pub stop_sequence: Option<String>,
    /// Token accounting.
    #[serde(default)]
    pub usage: Usage,
}

impl ModelReply {
    /// A text-only assistant reply.
    pub fn text(id: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            role: Role::Assistant,
            content: smallvec![ContentBlock::text(text)],
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            usage: Usage::default(),
        }
    }

    /// First text block, trimmed.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text).map(str::trim)
    }
}
