use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use switchboard_common::{
    Conversation, InvocationStatus, LogEntry, ModelResponse, Settlement, ToolInvocation, Turn,
};

use super::{ConversationStore, Join, StoreError, StoreSnapshot};

/// Receives the full state after every write.
pub trait SnapshotSink: Send + Sync {
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the snapshot cannot be saved.
    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError>;
}

/// Sink that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl SnapshotSink for NoPersistence {
    fn save(&self, _snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store holding everything behind one mutex.
///
/// The single lock makes every trait method, including the join, atomic.
/// A [`SnapshotSink`] sees the state after each write while the lock is
/// still held, so saved snapshots are totally ordered. A write becomes
/// visible only once its snapshot is saved; when the sink fails, the write
/// is dropped and the store keeps its previous state.
pub struct MemoryStore<S = NoPersistence> {
    state: Mutex<StoreSnapshot>,
    sink: S,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(StoreSnapshot::default(), NoPersistence)
    }
}

impl<S: SnapshotSink> MemoryStore<S> {
    /// Starts from `snapshot` and reports every write to `sink`.
    pub fn with_sink(snapshot: StoreSnapshot, sink: S) -> Self {
        Self {
            state: Mutex::new(snapshot),
            sink,
        }
    }

    /// Copy of the current state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if the lock is poisoned.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreSnapshot>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreSnapshot) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let state = self.lock()?;
        f(&state)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut StoreSnapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.lock()?;
        // A failed save must leave the live state untouched.
        let mut next = state.clone();
        let value = f(&mut next)?;
        self.sink.save(&next)?;
        *state = next;
        Ok(value)
    }
}

impl StoreSnapshot {
    fn conversation_mut(&mut self, id: Uuid) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::ConversationNotFound(id))
    }

    fn turn_ref(&self, id: Uuid) -> Result<&Turn, StoreError> {
        self.turns.iter().find(|t| t.id == id).ok_or(StoreError::TurnNotFound(id))
    }

    fn turn_mut(&mut self, id: Uuid) -> Result<&mut Turn, StoreError> {
        self.turns.iter_mut().find(|t| t.id == id).ok_or(StoreError::TurnNotFound(id))
    }

    fn response_mut(&mut self, id: Uuid) -> Result<&mut ModelResponse, StoreError> {
        self.responses
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::ResponseNotFound(id))
    }

    fn invocation_mut(&mut self, id: Uuid) -> Result<&mut ToolInvocation, StoreError> {
        self.invocations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::InvocationNotFound(id))
    }

    fn active_for_response(&self, response_id: Uuid) -> usize {
        self.invocations
            .iter()
            .filter(|i| i.response_id == response_id && i.status.is_active())
            .count()
    }
}

impl<S: SnapshotSink> ConversationStore for MemoryStore<S> {
    fn find_or_create_conversation(&self, id: Option<Uuid>) -> Result<(Conversation, bool), StoreError> {
        self.write(|state| {
            if let Some(existing) = id.and_then(|id| state.conversations.iter().find(|c| c.id == id)) {
                return Ok((existing.clone(), false));
            }
            let conversation = Conversation::new(id.unwrap_or_else(Uuid::new_v4));
            state.conversations.push(conversation.clone());
            Ok((conversation, true))
        })
    }

    fn conversation(&self, id: Uuid) -> Result<Conversation, StoreError> {
        self.read(|state| {
            state
                .conversations
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or(StoreError::ConversationNotFound(id))
        })
    }

    fn set_title(&self, id: Uuid, title: &str) -> Result<Conversation, StoreError> {
        self.write(|state| {
            let conversation = state.conversation_mut(id)?;
            conversation.title = Some(title.to_string());
            conversation.updated_at = Utc::now();
            Ok(conversation.clone())
        })
    }

    fn create_turn(&self, turn: Turn) -> Result<Turn, StoreError> {
        self.write(|state| {
            state.conversation_mut(turn.conversation_id)?.updated_at = Utc::now();
            state.turns.push(turn.clone());
            Ok(turn)
        })
    }

    fn turn(&self, id: Uuid) -> Result<Turn, StoreError> {
        self.read(|state| state.turn_ref(id).cloned())
    }

    fn turns(&self, conversation_id: Uuid) -> Result<Vec<Turn>, StoreError> {
        self.read(|state| {
            Ok(state
                .turns
                .iter()
                .filter(|t| t.conversation_id == conversation_id)
                .cloned()
                .collect())
        })
    }

    fn turns_up_to(&self, turn_id: Uuid) -> Result<Vec<Turn>, StoreError> {
        self.read(|state| {
            let conversation_id = state.turn_ref(turn_id)?.conversation_id;
            let mut turns = Vec::new();
            for turn in state.turns.iter().filter(|t| t.conversation_id == conversation_id) {
                turns.push(turn.clone());
                if turn.id == turn_id {
                    break;
                }
            }
            Ok(turns)
        })
    }

    fn mark_turn_processed(&self, id: Uuid) -> Result<Turn, StoreError> {
        self.write(|state| {
            let turn = state.turn_mut(id)?;
            turn.mark_processed();
            Ok(turn.clone())
        })
    }

    fn mark_turn_errored(&self, id: Uuid, message: Option<String>) -> Result<Turn, StoreError> {
        self.write(|state| {
            let turn = state.turn_mut(id)?;
            turn.mark_errored(message);
            Ok(turn.clone())
        })
    }

    fn create_response(&self, response: ModelResponse) -> Result<ModelResponse, StoreError> {
        self.write(|state| {
            state.turn_ref(response.turn_id)?;
            state.responses.push(response.clone());
            Ok(response)
        })
    }

    fn response(&self, id: Uuid) -> Result<ModelResponse, StoreError> {
        self.read(|state| {
            state
                .responses
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or(StoreError::ResponseNotFound(id))
        })
    }

    fn responses_for_turn(&self, turn_id: Uuid) -> Result<Vec<ModelResponse>, StoreError> {
        self.read(|state| {
            Ok(state
                .responses
                .iter()
                .filter(|r| r.turn_id == turn_id)
                .cloned()
                .collect())
        })
    }

    fn create_invocations(&self, invocations: Vec<ToolInvocation>) -> Result<Vec<ToolInvocation>, StoreError> {
        self.write(|state| {
            for invocation in &invocations {
                if !state.responses.iter().any(|r| r.id == invocation.response_id) {
                    return Err(StoreError::ResponseNotFound(invocation.response_id));
                }
            }
            state.invocations.extend(invocations.iter().cloned());
            Ok(invocations)
        })
    }

    fn invocation(&self, id: Uuid) -> Result<ToolInvocation, StoreError> {
        self.read(|state| {
            state
                .invocations
                .iter()
                .find(|i| i.id == id)
                .cloned()
                .ok_or(StoreError::InvocationNotFound(id))
        })
    }

    fn invocations_for_response(&self, response_id: Uuid) -> Result<Vec<ToolInvocation>, StoreError> {
        self.read(|state| {
            Ok(state
                .invocations
                .iter()
                .filter(|i| i.response_id == response_id)
                .cloned()
                .collect())
        })
    }

    fn invocations_with_status(&self, status: InvocationStatus) -> Result<Vec<ToolInvocation>, StoreError> {
        self.read(|state| {
            Ok(state
                .invocations
                .iter()
                .filter(|i| i.status == status)
                .cloned()
                .collect())
        })
    }

    fn transition(&self, id: Uuid, from: InvocationStatus, to: InvocationStatus) -> Result<bool, StoreError> {
        self.write(|state| {
            let invocation = state.invocation_mut(id)?;
            Ok(invocation.status == from && invocation.transition(to))
        })
    }

    fn finish_invocation(&self, id: Uuid, settlement: Settlement) -> Result<Option<Join>, StoreError> {
        self.write(|state| {
            let invocation = state.invocation_mut(id)?;
            if !invocation.settle(settlement) {
                return Ok(None);
            }
            let invocation = invocation.clone();

            let remaining = state.active_for_response(invocation.response_id);
            let response = state.response_mut(invocation.response_id)?;
            let advance = remaining == 0 && !response.continued;
            if advance {
                response.continued = true;
            }
            Ok(Some(Join {
                invocation,
                remaining,
                advance,
            }))
        })
    }

    fn claim_continuation(&self, response_id: Uuid) -> Result<bool, StoreError> {
        self.write(|state| {
            let remaining = state.active_for_response(response_id);
            let response = state.response_mut(response_id)?;
            if response.continued || remaining > 0 {
                return Ok(false);
            }
            response.continued = true;
            Ok(true)
        })
    }

    fn append_log(&self, entry: LogEntry) -> Result<LogEntry, StoreError> {
        self.write(|state| {
            state.invocation_mut(entry.invocation_id)?;
            state.logs.push(entry.clone());
            Ok(entry)
        })
    }

    fn logs_for_invocation(&self, invocation_id: Uuid) -> Result<Vec<LogEntry>, StoreError> {
        self.read(|state| {
            Ok(state
                .logs
                .iter()
                .filter(|l| l.invocation_id == invocation_id)
                .cloned()
                .collect())
        })
    }
}
