//! Logging contract handed to a tool for the duration of one invocation.

use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use switchboard_common::LogLevel;

/// Narrow logging interface scoped to a single tool invocation.
///
/// Tools report progress and failures through `log` and announce their
/// final payload through `complete`. Implementations decide where entries
/// land; the orchestrator backs this with the invocation's log trail.
pub trait InvocationLogger: Send + Sync {
    /// Appends an entry.
    fn log(&self, level: LogLevel, message: &str, context: Value);

    /// Announces the final payload. Called once per execution.
    fn complete(&self, payload: &Value);

    /// Appends an `error` entry.
    fn error(&self, message: &str, context: Value) {
        self.log(LogLevel::Error, message, context);
    }

    /// Appends a `warning` entry.
    fn warning(&self, message: &str, context: Value) {
        self.log(LogLevel::Warning, message, context);
    }

    /// Appends an `info` entry.
    fn info(&self, message: &str, context: Value) {
        self.log(LogLevel::Info, message, context);
    }

    /// Appends a `success` entry.
    fn success(&self, message: &str, context: Value) {
        self.log(LogLevel::Success, message, context);
    }

    /// Appends a `progress` entry.
    fn progress(&self, message: &str, context: Value) {
        self.log(LogLevel::Progress, message, context);
    }
}

/// An entry captured by [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLog {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Structured context.
    pub context: Value,
}

/// In-memory logger that keeps every entry and completion.
///
/// Useful for exercising tool implementations without a store.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<RecordedLog>>,
    completions: Mutex<Vec<Value>>,
}

impl RecordingLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in the order they were logged.
    #[must_use]
    pub fn entries(&self) -> Vec<RecordedLog> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads passed to `complete`, in order.
    #[must_use]
    pub fn completions(&self) -> Vec<Value> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether an entry with this level and message was logged.
    #[must_use]
    pub fn contains(&self, level: LogLevel, message: &str) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.level == level && entry.message == message)
    }
}

impl InvocationLogger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, context: Value) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedLog {
                level,
                message: message.to_string(),
                context,
            });
    }

    fn complete(&self, payload: &Value) {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());
    }
}
