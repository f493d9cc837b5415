//! Tool catalogue entries and execution outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::invocation::Settlement;

/// Separator between provider key and tool name.
pub const QUALIFIED_SEPARATOR: char = '.';

/// Joins a provider key and a tool name.
#[must_use]
pub fn qualify(provider: &str, tool: &str) -> String {
    format!("{provider}{QUALIFIED_SEPARATOR}{tool}")
}

/// Splits a qualified name on the first separator.
#[must_use]
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(QUALIFIED_SEPARATOR)
}

/// One entry of the tool catalogue offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name; qualified once it leaves the registry.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the arguments.
    pub input_schema: Value,
}

impl ToolSpec {
    /// Creates a catalogue entry.
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Copy of this entry named `provider.name`.
    #[must_use]
    pub fn qualified(&self, provider: &str) -> Self {
        Self {
            name: qualify(provider, &self.name),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Structured error returned by a tool instead of raising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Short summary.
    pub message: String,
    /// Underlying error text.
    pub error: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.message, self.error)
    }
}

/// Result of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Parsed result payload.
    Success(Value),
    /// Structured failure.
    Failure(ToolFailure),
}

impl ToolOutcome {
    /// Builds a failure outcome.
    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failure(ToolFailure {
            message: message.into(),
            error: error.into(),
        })
    }

    /// True for [`ToolOutcome::Failure`].
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Final payload: the result verbatim, or `{isError, message, error}`.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Success(value) => value.clone(),
            Self::Failure(failure) => json!({
                "isError": true,
                "message": failure.message,
                "error": failure.error,
            }),
        }
    }

    /// Terminal state this outcome puts an invocation in.
    #[must_use]
    pub fn into_settlement(self) -> Settlement {
        match self {
            Self::Success(value) => Settlement::Completed(value),
            Self::Failure(failure) => Settlement::Failed(failure.error),
        }
    }
}
