//! Replays stored entities as model history.
//!
//! The output depends only on what is stored, in creation order, so a
//! conversation that was paused on deferred tools looks the same to the
//! model as one that ran straight through.

use serde_json::{Value, json};

use switchboard_common::{
    ContentBlock, ContentBlocks, HistoryItem, InvocationStatus, MessageContent, Role, ToolInvocation, Turn,
};

use crate::store::{ConversationStore, StoreError};

/// Text of the placeholder sent for an invocation that has no result yet.
pub const PENDING_RESULT_MESSAGE: &str = "Result not yet available";

/// Builds the history for `turn`: every turn of its conversation up to and
/// including it, each followed by its responses, each response followed by
/// one user entry carrying a result block per invocation.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn assemble(store: &dyn ConversationStore, turn: &Turn) -> Result<Vec<HistoryItem>, StoreError> {
    let mut history = Vec::new();

    for turn in store.turns_up_to(turn.id)? {
        history.push(HistoryItem::new(turn.role, turn.content));

        for response in store.responses_for_turn(turn.id)? {
            if response.content.is_empty() {
                continue;
            }
            history.push(HistoryItem::new(response.role, MessageContent::Blocks(response.content)));

            let invocations = store.invocations_for_response(response.id)?;
            if invocations.is_empty() {
                continue;
            }
            let results: ContentBlocks = invocations.iter().map(tool_result).collect();
            history.push(HistoryItem::new(Role::User, results));
        }
    }

    Ok(history)
}

/// The result block answering one invocation.
#[must_use]
pub fn tool_result(invocation: &ToolInvocation) -> ContentBlock {
    let (content, is_error) = match invocation.status {
        InvocationStatus::Completed => (invocation.result.clone().unwrap_or(Value::Null), false),
        InvocationStatus::Failed => (
            json!({
                "isError": true,
                "error": invocation.error.clone().unwrap_or_default(),
            }),
            true,
        ),
        status => (
            json!({
                "status": status.as_str(),
                "message": PENDING_RESULT_MESSAGE,
            }),
            false,
        ),
    };
    ContentBlock::ToolResult {
        tool_use_id: invocation.correlation_id.clone(),
        content,
        is_error,
    }
}
