//! Execution errors.

use cronman_core::{CoreError, JobId};
use cronman_storage::StorageError;

/// Result alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Errors raised by the orchestrator and the worker runner.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid job configuration
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A process could not be started or awaited
    #[error("process error: {0}")]
    Process(#[from] std::io::Error),

    /// No job with this id
    #[error("job {0} not found")]
    JobNotFound(JobId),
}
