//! Recorded model responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{ContentBlock, ContentBlocks, Role};
use crate::model::ModelReply;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the reply.
    EndTurn,
    /// Token limit reached.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
    /// The model wants tools run.
    ToolUse,
    /// The model declined to answer.
    Refusal,
}

/// Token accounting for one model round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Generated tokens.
    pub output_tokens: u32,
}

impl Usage {
    /// Sum of input and output tokens.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One model round trip within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning turn.
    pub turn_id: Uuid,
    /// Identity assigned by the model provider.
    pub provider_response_id: String,
    /// Model that produced the reply.
    pub model: String,
    /// Author role, normally assistant.
    pub role: Role,
    /// Raw content blocks.
    pub content: ContentBlocks,
    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,
    /// Matched stop sequence, if any.
    pub stop_sequence: Option<String>,
    /// Token accounting.
    #[serde(default)]
    pub usage: Usage,
    /// Set once the turn has been advanced past this response's invocations.
    #[serde(default)]
    pub continued: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ModelResponse {
    /// Records a reply under a turn.
    #[must_use]
    pub fn from_reply(turn_id: Uuid, reply: ModelReply) -> Self {
        Self {
            id: Uuid::new_v4(),
            turn_id,
            provider_response_id: reply.id,
            model: reply.model,
            role: reply.role,
            content: reply.content,
            stop_reason: reply.stop_reason,
            stop_sequence: reply.stop_sequence,
            usage: reply.usage,
            continued: false,
            created_at: Utc::now(),
        }
    }

    /// Tool-use blocks in reply order.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content.iter().filter(|block| block.as_tool_use().is_some())
    }

    /// Whether the reply requests any tool runs.
    #[must_use]
    pub fn has_tool_uses(&self) -> bool {
        self.tool_uses().next().is_some()
    }

    /// Text of the reply, one block per line.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
