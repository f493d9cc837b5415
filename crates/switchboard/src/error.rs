use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// No tool provider is registered.
    #[error("No tool providers are configured")]
    ProviderUnavailable,

    /// The model round trip failed; the turn has been marked errored.
    #[error("Model call failed for turn {turn_id}: {message}")]
    Model { turn_id: Uuid, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Task runner error: {0}")]
    TaskRunner(String),
}
