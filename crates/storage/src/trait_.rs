//! Storage trait abstraction.

use async_trait::async_trait;
use cronman_core::{Job, JobFilter, JobId, RunResult, Time};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQL error
    #[cfg(feature = "sqlite")]
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Persistence of jobs and their run results.
///
/// Every write is durable when the call returns. Results belong to their
/// job: deleting a job deletes its results and every dependency edge
/// pointing at it.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Job operations ===

    /// Save a job (create or update). Assigns `job.id` on first save.
    async fn save_job(&mut self, job: &mut Job) -> Result<()>;

    /// Load a job by ID.
    async fn load_job(&self, id: JobId) -> Result<Option<Job>>;

    /// List jobs matching the filter, ordered by id.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Find the `number`-th job registered for `command`.
    async fn find_by_command(&self, command: &str, number: u32) -> Result<Option<Job>>;

    /// Find jobs whose command equals `needle` or whose id is `needle`,
    /// restricted to jobs carrying any of `tags` when `tags` is non-empty.
    async fn find_by_command_or_id(&self, needle: &str, tags: &[String]) -> Result<Vec<Job>>;

    /// Delete a job together with its results and inbound edges.
    async fn delete_job(&mut self, id: JobId) -> Result<()>;

    // === Result operations ===

    /// Save a run result.
    async fn save_result(&mut self, result: &RunResult) -> Result<()>;

    /// Most recent result of a job by `run_at`.
    async fn latest_result(&self, job_id: JobId) -> Result<Option<RunResult>>;

    /// All results of a job, oldest first.
    async fn list_results(&self, job_id: JobId) -> Result<Vec<RunResult>>;

    /// Delete results created at or before `cutoff`; returns how many.
    async fn delete_results_older_than(&mut self, cutoff: Time) -> Result<usize>;
}

/// Whether `job` answers to `needle` as a command name or an id.
pub(crate) fn matches_command_or_id(job: &Job, needle: &str) -> bool {
    if job.command == needle {
        return true;
    }
    match (job.id, needle.parse::<JobId>()) {
        (Some(id), Ok(wanted)) => id == wanted,
        _ => false,
    }
}
