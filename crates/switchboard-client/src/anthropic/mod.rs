//! Anthropic Messages API types and client implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use typed_builder::TypedBuilder;

use switchboard_common::{
    ContentBlock, ContentBlocks, HistoryItem, ModelReply, ModelRequest, Role, ToolSpec, Usage,
};

use crate::ClientConfig;

pub mod client;
pub use client::AnthropicClient;

/// The required API version header value for Anthropic API.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default base URL for the Anthropic API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Stand-in for the provider separator in wire tool names.
///
/// Tool names on the wire must match `^[a-zA-Z0-9_-]{1,64}$`.
pub const WIRE_SEPARATOR: &str = "__";

/// Encodes a qualified `provider.tool` name for the wire.
///
/// The registry only admits tool names made of wire-safe characters, so the
/// separator is the only `.` to replace.
#[must_use]
pub fn wire_tool_name(qualified: &str) -> String {
    qualified.replacen(switchboard_common::QUALIFIED_SEPARATOR, WIRE_SEPARATOR, 1)
}

/// Decodes a wire tool name back to `provider.tool`.
///
/// Provider keys never contain the wire separator, so its first occurrence
/// marks the boundary.
#[must_use]
pub fn qualified_tool_name(wire: &str) -> String {
    match wire.split_once(WIRE_SEPARATOR) {
        Some((provider, tool)) => switchboard_common::qualify(provider, tool),
        None => wire.to_string(),
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// Content block types that can appear in request messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestContentBlock {
    Text {
        text: String,
    },
    /// Tool result content block.
    ToolResult {
        /// ID of the tool use this is responding to.
        tool_use_id: String,
        /// Result text; structured payloads are sent as JSON text.
        content: String,
        /// Whether the tool execution resulted in an error.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Tool use content block (for assistant messages with tool calls).
    ToolUse {
        id: String,
        /// Wire-encoded tool name.
        name: String,
        input: Value,
    },
}

impl From<&ContentBlock> for RequestContentBlock {
    fn from(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => Self::Text { text: text.clone() },
            ContentBlock::ToolUse { id, name, input } => Self::ToolUse {
                id: id.clone(),
                name: wire_tool_name(name),
                input: input.clone(),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Self::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: match content {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                },
                is_error: is_error.then_some(true),
            },
        }
    }
}

/// Message content - can be a simple string or array of content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<RequestContentBlock>),
}

/// Role of message author in Anthropic API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    User,
    Assistant,
}

impl From<Role> for AnthropicRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Assistant => Self::Assistant,
            // System text in history is replayed as user input
            Role::User | Role::System => Self::User,
        }
    }
}

/// An Anthropic message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: AnthropicRole,
    pub content: MessageContent,
}

impl From<&HistoryItem> for AnthropicMessage {
    fn from(item: &HistoryItem) -> Self {
        let content = match &item.content {
            switchboard_common::MessageContent::Text(text) => MessageContent::Text(text.clone()),
            switchboard_common::MessageContent::Blocks(blocks) => {
                MessageContent::Blocks(blocks.iter().map(RequestContentBlock::from).collect())
            }
        };
        Self {
            role: AnthropicRole::from(item.role),
            content,
        }
    }
}

/// Anthropic tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    /// Wire-encoded tool name.
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

impl From<&ToolSpec> for AnthropicTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            name: wire_tool_name(&spec.name),
            description: spec.description.clone(),
            input_schema: spec.input_schema.clone(),
        }
    }
}

/// Request for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize, TypedBuilder)]
pub struct CreateMessageRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
}

impl From<(&ModelRequest, &ClientConfig)> for CreateMessageRequest {
    fn from((request, config): (&ModelRequest, &ClientConfig)) -> Self {
        let tools = (!request.tools.is_empty())
            .then(|| request.tools.iter().map(AnthropicTool::from).collect());
        Self::builder()
            .model(request.model.clone().unwrap_or_else(|| config.model.clone()))
            .messages(request.messages.iter().map(AnthropicMessage::from).collect())
            .max_tokens(request.max_tokens.unwrap_or(config.max_tokens))
            .system(request.system.clone())
            .tools(tools)
            .build()
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Content block types that can appear in responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentBlock {
    Text {
        text: String,
    },
    /// Tool use request from the model.
    ToolUse {
        id: String,
        /// Wire-encoded tool name.
        name: String,
        input: Value,
    },
    /// Extended thinking; not replayed.
    Thinking {
        thinking: String,
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
}

/// Reason why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
    PauseTurn,
}

impl From<StopReason> for switchboard_common::StopReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::MaxTokens => Self::MaxTokens,
            StopReason::StopSequence => Self::StopSequence,
            StopReason::ToolUse => Self::ToolUse,
            StopReason::Refusal => Self::Refusal,
            StopReason::EndTurn | StopReason::PauseTurn => Self::EndTurn,
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

/// Response from the Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Unique message ID (e.g., "`msg_01XFDUDYJgAACzvnptvVoYEL`").
    pub id: String,
    pub model: String,
    pub content: Vec<ResponseContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

impl From<MessageResponse> for ModelReply {
    fn from(response: MessageResponse) -> Self {
        let content: ContentBlocks = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(ContentBlock::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                    id,
                    name: qualified_tool_name(&name),
                    input,
                }),
                ResponseContentBlock::Thinking { .. }
                | ResponseContentBlock::RedactedThinking { .. } => None,
            })
            .collect::<SmallVec<_>>();

        Self {
            id: response.id,
            model: response.model,
            role: Role::Assistant,
            content,
            stop_reason: response.stop_reason.map(Into::into),
            stop_sequence: response.stop_sequence,
            usage: response.usage.into(),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// API error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error type (e.g., "`invalid_request_error`").
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Full error response from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}
