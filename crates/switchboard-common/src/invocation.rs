//! Tool invocations and their log trail.
//!
//! Status only ever moves forward:
//!
//! ```text
//! pending ──┬──> queued ──> processing ──┬──> completed
//!           └───────────────────────────┘└──> failed
//! ```
//!
//! Any non-terminal state may fail directly (unknown provider, a submission
//! error, a crash before completion). `completed` and `failed` are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tools::split_qualified;

/// Lifecycle state of a [`ToolInvocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Handed to the background task runner.
    Queued,
    /// Executing.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl InvocationStatus {
    /// Every state that still needs work.
    pub const ACTIVE: [Self; 3] = [Self::Pending, Self::Queued, Self::Processing];

    /// True for `pending`, `queued` and `processing`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Processing)
    }

    /// True for `completed` and `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        self.is_active() && next.rank() > self.rank()
    }

    /// Lowercase name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome applied to an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Success with a result payload.
    Completed(Value),
    /// Failure with an error text.
    Failed(String),
}

impl Settlement {
    /// Status the invocation ends up in.
    #[must_use]
    pub const fn status(&self) -> InvocationStatus {
        match self {
            Self::Completed(_) => InvocationStatus::Completed,
            Self::Failed(_) => InvocationStatus::Failed,
        }
    }
}

/// One request by the model to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning model response.
    pub response_id: Uuid,
    /// Correlation id assigned by the model.
    pub correlation_id: String,
    /// Qualified tool name as requested by the model.
    pub tool_name: String,
    /// Input arguments.
    pub arguments: Value,
    /// Current lifecycle state.
    pub status: InvocationStatus,
    /// Result payload, present only when `completed`.
    pub result: Option<Value>,
    /// Error text, present only when `failed`.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the invocation reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolInvocation {
    /// Creates an invocation in `pending`.
    pub fn pending(
        response_id: Uuid,
        correlation_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            response_id,
            correlation_id: correlation_id.into(),
            tool_name: tool_name.into(),
            arguments,
            status: InvocationStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Provider key part of the qualified name.
    #[must_use]
    pub fn provider_key(&self) -> &str {
        split_qualified(&self.tool_name).map_or(self.tool_name.as_str(), |(provider, _)| provider)
    }

    /// Tool part of the qualified name, empty when the name is unqualified.
    #[must_use]
    pub fn local_tool_name(&self) -> &str {
        split_qualified(&self.tool_name).map_or("", |(_, tool)| tool)
    }

    /// Moves to a non-terminal state. Returns false if the move is not forward.
    ///
    /// Terminal states are reached through [`ToolInvocation::settle`].
    pub fn transition(&mut self, next: InvocationStatus) -> bool {
        if next.is_terminal() || !self.status.can_transition_to(next) {
            return false;
        }
        if next == InvocationStatus::Processing {
            self.started_at = Some(Utc::now());
        }
        self.status = next;
        true
    }

    /// Moves to a terminal state. Returns false if already terminal.
    pub fn settle(&mut self, settlement: Settlement) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = settlement.status();
        match settlement {
            Settlement::Completed(result) => {
                self.result = Some(result);
                self.error = None;
            }
            Settlement::Failed(error) => {
                self.result = None;
                self.error = Some(error);
            }
        }
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        true
    }
}

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Failure.
    Error,
    /// Something looks wrong but execution continues.
    Warning,
    /// Informational.
    Info,
    /// A step finished successfully.
    Success,
    /// Intermediate progress report.
    Progress,
}

impl LogLevel {
    /// Numeric severity; higher is more severe.
    #[must_use]
    pub const fn severity(self) -> u16 {
        match self {
            Self::Error => 500,
            Self::Warning => 400,
            Self::Info => 200,
            Self::Success => 100,
            Self::Progress => 50,
        }
    }

    /// Lowercase name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Success => "success",
            Self::Progress => "progress",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only log line recorded while a tool runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning invocation.
    pub invocation_id: Uuid,
    /// Severity.
    pub level: LogLevel,
    /// Human readable message.
    pub message: String,
    /// Structured context.
    #[serde(default)]
    pub context: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// Creates a log entry stamped now.
    pub fn new(invocation_id: Uuid, level: LogLevel, message: impl Into<String>, context: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            invocation_id,
            level,
            message: message.into(),
            context,
            created_at: Utc::now(),
        }
    }
}
