//! # switchboard
//!
//! Turn orchestration for tool-using language models.
//!
//! A user message becomes a [`Turn`](switchboard_common::Turn). The
//! [`Orchestrator`] sends the conversation history and the tool catalogue
//! to the model, records the reply, and fans each requested tool call out as
//! a [`ToolInvocation`](switchboard_common::ToolInvocation). Tools run inline
//! or, when their provider defers them, on a [`TaskRunner`]. Once every
//! invocation of a reply has settled, exactly one caller continues the turn
//! with the results appended. The loop ends when the model answers without
//! asking for tools.
//!
//! All state lives in a [`ConversationStore`]; a restarted process picks up
//! where it stopped through [`Orchestrator::recover`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use switchboard::{MemoryStore, Orchestrator, QueueRunner};
//! use switchboard_client::{AnthropicClient, ClientConfig};
//! use switchboard_tools::{ToolRegistry, ToolSet, builtin::builtin_tool};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut clock = ToolSet::new("clock");
//! if let Some(tool) = builtin_tool("current_time") {
//!     clock.register(tool);
//! }
//! let registry = ToolRegistry::new().with_provider("clock", Arc::new(clock))?;
//!
//! let model = AnthropicClient::new(ClientConfig::default().with_api_key("sk-..."))?;
//! let (runner, queue) = QueueRunner::channel();
//! let orchestrator = Arc::new(Orchestrator::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(model),
//!     Arc::new(registry),
//!     Arc::new(runner),
//! ));
//! let _worker = Arc::clone(&orchestrator).serve_deferred(queue);
//!
//! let turn = orchestrator.start_conversation("What time is it?", None).await?;
//! println!("processed: {}", turn.processed);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod history;
pub mod logger;
mod orchestrator;
pub mod runner;
pub mod store;
pub mod title;

#[cfg(test)]
mod test_support;

pub use error::OrchestratorError;
pub use events::{EventCallback, OrchestratorEvent};
pub use orchestrator::{
    DEFAULT_SYSTEM_PROMPT, INTERRUPTED_MESSAGE, Orchestrator, OrchestratorSettings, Recovery,
};
pub use runner::{DeferredQueue, QueueRunner, TaskRunner};
pub use store::{ConversationStore, MemoryStore, StoreError, StoreSnapshot};
