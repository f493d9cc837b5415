//! Error types for the switchboard binary.

use thiserror::Error;

use switchboard::{OrchestratorError, StoreError};
use switchboard_tools::ToolError;

#[derive(Debug, Error)]
pub enum CliError {
    /// I/O error (config, state and tool definition files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// A tool provider could not be built.
    #[error("Tool provider error: {0}")]
    Tool(#[from] ToolError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
