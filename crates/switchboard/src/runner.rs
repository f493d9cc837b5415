//! Background execution of deferred tool invocations.
//!
//! The orchestrator hands a runner nothing but an invocation id. Runners may
//! deliver an id more than once; `Orchestrator::run_deferred` treats every
//! delivery after the first as a no-op.

use std::sync::Arc;

use log::{debug, error};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::Orchestrator;
use crate::error::OrchestratorError;

/// At-least-once task execution service.
pub trait TaskRunner: Send + Sync {
    /// Schedules `run_deferred(invocation_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskRunner`] if the task cannot be
    /// scheduled.
    fn submit(&self, invocation_id: Uuid) -> Result<(), OrchestratorError>;
}

/// In-process runner feeding a tokio channel.
#[derive(Debug, Clone)]
pub struct QueueRunner {
    sender: mpsc::UnboundedSender<Uuid>,
}

/// Receiving end of a [`QueueRunner`].
#[derive(Debug)]
pub struct DeferredQueue {
    receiver: mpsc::UnboundedReceiver<Uuid>,
}

impl QueueRunner {
    #[must_use]
    pub fn channel() -> (Self, DeferredQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, DeferredQueue { receiver })
    }
}

impl TaskRunner for QueueRunner {
    fn submit(&self, invocation_id: Uuid) -> Result<(), OrchestratorError> {
        self.sender
            .send(invocation_id)
            .map_err(|_| OrchestratorError::TaskRunner("Deferred queue is closed".to_string()))
    }
}

impl DeferredQueue {
    /// Next submitted id, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Uuid> {
        self.receiver.recv().await
    }
}

impl Orchestrator {
    /// Drains `queue`, running each invocation on its own task.
    ///
    /// Deferred invocations of one response therefore run concurrently. The
    /// returned handle finishes when the queue closes.
    pub fn serve_deferred(self: Arc<Self>, mut queue: DeferredQueue) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(invocation_id) = queue.recv().await {
                debug!("Picked up deferred invocation {invocation_id}");
                let orchestrator = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.run_deferred(invocation_id).await {
                        error!("Deferred invocation {invocation_id} failed: {e}");
                    }
                });
            }
            debug!("Deferred queue closed");
        })
    }
}
