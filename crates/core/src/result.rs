//! Outcome of one job execution.

use serde::{Deserialize, Serialize};

use crate::id::{JobId, RunResultId};
use crate::Time;

/// Immutable record written when a worker process finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique identifier
    pub id: RunResultId,

    /// Owning job
    pub job_id: JobId,

    /// When the execution started
    pub run_at: Time,

    /// Wall-clock duration
    pub duration: std::time::Duration,

    /// Process exit status; `-1` when killed by a signal
    pub status_code: i32,

    /// Captured output
    pub output: Option<String>,

    /// Creation timestamp
    pub created_at: Time,
}

impl RunResult {
    /// Record an execution of `job_id`.
    pub fn new(
        job_id: JobId,
        run_at: Time,
        duration: std::time::Duration,
        status_code: i32,
        output: Option<String>,
    ) -> Self {
        Self {
            id: RunResultId::new(),
            job_id,
            run_at,
            duration,
            status_code,
            output,
            created_at: chrono::Utc::now(),
        }
    }

    /// A run succeeded iff it exited with status 0.
    pub fn is_success(&self) -> bool {
        self.status_code == 0
    }
}
