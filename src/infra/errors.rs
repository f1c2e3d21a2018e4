// src/infra/errors.rs — Error types for ARF

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArfError {
    // Pipeline errors (recoverable — the item is retried next cycle)
    #[error("Pipeline failed on '{item}': {message}")]
    Pipeline {
        item: String,
        message: String,
        recoverable: bool,
    },

    // Sandbox errors (the run could not be started or torn down;
    // a timeout or non-zero exit is a RunStatus, not an error)
    #[error("Sandbox '{env}' failed: {message}")]
    Sandbox { env: String, message: String },

    // Checkpoint write failures. Read failures degrade to fresh state
    // and are never surfaced as this variant.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArfError {
    /// Whether a retry of the failed work item can be expected to
    /// succeed. The item stays queued either way; the scheduler uses
    /// this to grade the failure log.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ArfError::Pipeline {
                recoverable: true,
                ..
            }
        )
    }
}
