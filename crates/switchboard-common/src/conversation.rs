//! Conversations and the turns they contain.
//!
//! A [`Conversation`] is identified by a stable external id and is created
//! the first time a user message arrives for that id. Every user message
//! becomes a [`Turn`]; the turn stays open until the model produces a reply
//! with no outstanding tool calls.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use uuid::Uuid;

/// Message stored on a turn that failed without a more specific message.
pub const DEFAULT_TURN_ERROR: &str = "An error occurred while processing your request";

/// Author of a turn or a model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user input.
    #[default]
    User,
    /// Model output.
    Assistant,
    /// Operator instructions.
    System,
}

impl Role {
    /// Lowercase wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of message content.
///
/// Model replies are sequences of `text` and `tool_use` blocks. The history
/// sent back to the model adds `tool_result` blocks that answer each
/// `tool_use` by its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A request by the model to run a tool.
    ToolUse {
        /// Correlation id assigned by the model.
        id: String,
        /// Qualified tool name (`provider.tool`).
        name: String,
        /// Tool arguments.
        input: Value,
    },
    /// The result of a tool run, answering a `tool_use` block.
    ToolResult {
        /// Correlation id of the `tool_use` block being answered.
        tool_use_id: String,
        /// Result payload.
        content: Value,
        /// Whether the payload describes a failure.
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Creates a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text of a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    /// Returns `(correlation id, qualified name, arguments)` of a tool-use block.
    #[must_use]
    pub fn as_tool_use(&self) -> Option<(&str, &str, &Value)> {
        match self {
            Self::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        }
    }
}

/// Inline storage for the common one-or-two block message.
pub type ContentBlocks = SmallVec<[ContentBlock; 2]>;

/// Body of a turn or history item: either plain text or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Structured content blocks.
    Blocks(ContentBlocks),
}

impl MessageContent {
    /// Concatenates every text part, one per line.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<ContentBlocks> for MessageContent {
    fn from(blocks: ContentBlocks) -> Self {
        Self::Blocks(blocks)
    }
}

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Stable external identity.
    pub id: Uuid,
    /// Display title, filled in after creation when title generation is on.
    pub title: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Creates an untitled conversation with the given external id.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// One user-authored message plus everything produced in reply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning conversation.
    pub conversation_id: Uuid,
    /// Author role.
    pub role: Role,
    /// Message body.
    pub content: MessageContent,
    /// Set once the model produced a reply without tool calls.
    #[serde(default)]
    pub processed: bool,
    /// Set when the model call failed.
    #[serde(default)]
    pub error: bool,
    /// Failure description when `error` is set.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Creates an open turn.
    pub fn new(conversation_id: Uuid, role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.into(),
            processed: false,
            error: false,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Creates an open user turn with text content.
    pub fn user(conversation_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, MessageContent::Text(text.into()))
    }

    /// True while the loop may still call the model for this turn.
    #[must_use]
    pub const fn is_awaiting_completion(&self) -> bool {
        !self.processed && !self.error
    }

    /// Closes the turn after a tool-free reply.
    pub const fn mark_processed(&mut self) {
        self.processed = true;
    }

    /// Closes the turn after a model failure.
    pub fn mark_errored(&mut self, message: Option<String>) {
        self.error = true;
        self.error_message = Some(message.unwrap_or_else(|| DEFAULT_TURN_ERROR.to_string()));
    }
}
