//! # switchboard-tools
//!
//! Tool provider contract and everything that plugs into it.
//!
//! A [`ToolProvider`] answers three questions: which tools it exposes, whether
//! a tool wants to run in the background, and how to run a tool now. The
//! [`ToolRegistry`] aggregates providers under keys and addresses their tools
//! as `provider.tool`.
//!
//! Providers do not need to share any code. [`ToolSet`] is a convenient base
//! that serves a list of [`ToolImplementation`]s, and the [`http`] module
//! builds tool sets whose tools are plain REST calls described by data files.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::{Value, json};
//! use switchboard_common::{ToolOutcome, ToolSpec};
//! use switchboard_tools::{InvocationLogger, ToolImplementation, ToolRegistry, ToolSet};
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl ToolImplementation for Shout {
//!     fn spec(&self) -> ToolSpec {
//!         ToolSpec::new("shout", "Upper-cases text", json!({
//!             "type": "object",
//!             "properties": {"text": {"type": "string"}},
//!             "required": ["text"],
//!         }))
//!     }
//!
//!     async fn execute(&self, args: &Value, logger: &dyn InvocationLogger) -> anyhow::Result<ToolOutcome> {
//!         let text = args["text"].as_str().unwrap_or_default().to_uppercase();
//!         let payload = json!({"text": text});
//!         logger.complete(&payload);
//!         Ok(ToolOutcome::Success(payload))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register("text", Arc::new(ToolSet::new("text").with_tool(Arc::new(Shout))))?;
//!
//! let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
//! assert_eq!(names, vec!["text.shout"]);
//! # Ok::<(), switchboard_tools::ToolError>(())
//! ```

use async_trait::async_trait;
use serde_json::Value;

use switchboard_common::{ToolOutcome, ToolSpec};

pub mod builtin;
pub mod error;
pub mod http;
pub mod logger;
mod registry;
mod toolset;

pub use error::ToolError;
pub use logger::{InvocationLogger, RecordedLog, RecordingLogger};
pub use registry::ToolRegistry;
pub use toolset::ToolSet;

/// A named source of tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Tools in provider order, with unqualified names.
    fn tools(&self) -> Vec<ToolSpec>;

    /// Whether the provider exposes `tool`.
    fn has_tool(&self, tool: &str) -> bool {
        self.tools().iter().any(|spec| spec.name == tool)
    }

    /// Whether `tool` should run on the background task runner.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ToolNotFound`] for unknown tools.
    fn should_defer(&self, tool: &str) -> Result<bool, ToolError>;

    /// Runs `tool` now.
    ///
    /// Tool-level failures come back as [`ToolOutcome::Failure`]; an `Err`
    /// means the provider could not run the tool at all.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ToolNotFound`] for unknown tools, or whatever the
    /// implementation raised.
    async fn execute(
        &self,
        tool: &str,
        arguments: &Value,
        logger: &dyn InvocationLogger,
    ) -> Result<ToolOutcome, ToolError>;
}

/// A single tool served by a [`ToolSet`].
#[async_trait]
pub trait ToolImplementation: Send + Sync {
    /// Catalogue entry with the unqualified tool name.
    fn spec(&self) -> ToolSpec;

    /// Whether the tool runs in the background. Defaults to inline.
    fn should_defer(&self) -> bool {
        false
    }

    /// Runs the tool.
    async fn execute(
        &self,
        arguments: &Value,
        logger: &dyn InvocationLogger,
    ) -> anyhow::Result<ToolOutcome>;
}
