//! Conversation store contract.
//!
//! The store owns the five entities of the data model and the one piece of
//! cross-context coordination the engine needs: the fan-in join. Everything
//! else is plain create/read/update.
//!
//! ## The join
//!
//! [`ConversationStore::finish_invocation`] settles an invocation, counts the
//! invocations of the same response that are still active and, when none
//! remain, claims the response's continuation, all as one atomic step. Two
//! completions racing on the last pair of invocations therefore cannot both
//! observe "zero remaining and not yet continued": exactly one of them gets
//! `advance == true`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use switchboard_common::{
    Conversation, InvocationStatus, LogEntry, ModelResponse, Settlement, ToolInvocation, Turn,
};

mod memory;

pub use memory::{MemoryStore, NoPersistence, SnapshotSink};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Turn not found: {0}")]
    TurnNotFound(Uuid),

    #[error("Model response not found: {0}")]
    ResponseNotFound(Uuid),

    #[error("Tool invocation not found: {0}")]
    InvocationNotFound(Uuid),

    /// A thread panicked while holding the store lock.
    #[error("Store lock poisoned")]
    Poisoned,

    /// The backing medium rejected a write.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Outcome of settling one invocation.
#[derive(Debug, Clone)]
pub struct Join {
    /// The invocation after settling.
    pub invocation: ToolInvocation,
    /// Invocations of the same response still active.
    pub remaining: usize,
    /// True for exactly one caller per response: the one that must advance
    /// the turn.
    pub advance: bool,
}

/// Serializable image of a whole store. Each list is in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub responses: Vec<ModelResponse>,
    #[serde(default)]
    pub invocations: Vec<ToolInvocation>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// Storage for conversations and everything they own.
///
/// Every method is a single consistent step; implementations must serialize
/// writes. Lists come back in creation order.
pub trait ConversationStore: Send + Sync {
    /// Finds the conversation with `id`, creating it when absent or when
    /// `id` is `None`. The flag is true when a conversation was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    fn find_or_create_conversation(&self, id: Option<Uuid>) -> Result<(Conversation, bool), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] for unknown ids.
    fn conversation(&self, id: Uuid) -> Result<Conversation, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] for unknown ids.
    fn set_title(&self, id: Uuid, title: &str) -> Result<Conversation, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] if the owner is unknown.
    fn create_turn(&self, turn: Turn) -> Result<Turn, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::TurnNotFound`] for unknown ids.
    fn turn(&self, id: Uuid) -> Result<Turn, StoreError>;

    /// Every turn of a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn turns(&self, conversation_id: Uuid) -> Result<Vec<Turn>, StoreError>;

    /// Turns of the conversation owning `turn_id`, up to and including it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TurnNotFound`] for unknown ids.
    fn turns_up_to(&self, turn_id: Uuid) -> Result<Vec<Turn>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::TurnNotFound`] for unknown ids.
    fn mark_turn_processed(&self, id: Uuid) -> Result<Turn, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::TurnNotFound`] for unknown ids.
    fn mark_turn_errored(&self, id: Uuid, message: Option<String>) -> Result<Turn, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::TurnNotFound`] if the owner is unknown.
    fn create_response(&self, response: ModelResponse) -> Result<ModelResponse, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::ResponseNotFound`] for unknown ids.
    fn response(&self, id: Uuid) -> Result<ModelResponse, StoreError>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn responses_for_turn(&self, turn_id: Uuid) -> Result<Vec<ModelResponse>, StoreError>;

    /// Persists a whole batch in one step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ResponseNotFound`] if an owner is unknown; no
    /// invocation is stored in that case.
    fn create_invocations(&self, invocations: Vec<ToolInvocation>) -> Result<Vec<ToolInvocation>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::InvocationNotFound`] for unknown ids.
    fn invocation(&self, id: Uuid) -> Result<ToolInvocation, StoreError>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn invocations_for_response(&self, response_id: Uuid) -> Result<Vec<ToolInvocation>, StoreError>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn invocations_with_status(&self, status: InvocationStatus) -> Result<Vec<ToolInvocation>, StoreError>;

    /// Conditional non-terminal move: applies only if the invocation is
    /// currently in `from`. Returns whether it was applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvocationNotFound`] for unknown ids.
    fn transition(&self, id: Uuid, from: InvocationStatus, to: InvocationStatus) -> Result<bool, StoreError>;

    /// Settles an invocation and runs the join check atomically.
    ///
    /// Returns `None` when the invocation was already terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvocationNotFound`] for unknown ids.
    fn finish_invocation(&self, id: Uuid, settlement: Settlement) -> Result<Option<Join>, StoreError>;

    /// Claims the continuation of a response whose invocations are all
    /// terminal. Returns false if some are active or it was already claimed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ResponseNotFound`] for unknown ids.
    fn claim_continuation(&self, response_id: Uuid) -> Result<bool, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::InvocationNotFound`] if the owner is unknown.
    fn append_log(&self, entry: LogEntry) -> Result<LogEntry, StoreError>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn logs_for_invocation(&self, invocation_id: Uuid) -> Result<Vec<LogEntry>, StoreError>;
}
