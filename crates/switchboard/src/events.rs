//! Change notifications emitted by the orchestrator.
//!
//! Each event is emitted at the call site that performed the mutation, after
//! the store has accepted it. Emission is fire-and-forget: the orchestrator
//! never depends on a subscriber.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use switchboard_common::{LogEntry, ToolInvocation, Turn};

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// The model produced a tool-free reply.
    TurnProcessed { turn: Turn },

    /// The model call failed.
    TurnErrored { turn: Turn },

    /// A tool wrote to its invocation log.
    LogAppended { entry: LogEntry },

    /// An invocation reached `completed` or `failed`.
    InvocationSettled { invocation: ToolInvocation },

    /// A tool reported its final payload through the logger.
    ToolCompleted { invocation_id: Uuid, payload: Value },
}

/// Subscriber for [`OrchestratorEvent`]s.
pub type EventCallback = Arc<dyn Fn(OrchestratorEvent) + Send + Sync>;
