//! Worker side of a launch: runs one job and records its result.

use std::process::Stdio;
use std::time::Instant;

use chrono::Utc;
use cronman_core::{JobId, RunResult};
use cronman_storage::Storage;
use tokio::process::Command;
use tracing::info;

use crate::error::{ExecutionError, Result};

/// Executes a job's command line and stores the outcome.
pub struct JobRunner<S: Storage> {
    storage: S,
    shell: String,
}

impl<S: Storage> JobRunner<S> {
    /// Create a runner that executes commands through `sh -c`.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            shell: "sh".to_string(),
        }
    }

    /// Use another shell.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run the job once and persist its [`RunResult`].
    pub async fn run(&mut self, job_id: JobId) -> Result<RunResult> {
        let job = self
            .storage
            .load_job(job_id)
            .await?
            .ok_or(ExecutionError::JobNotFound(job_id))?;

        let command_line = job.full_command();
        let run_at = Utc::now();
        let clock = Instant::now();
        info!(job_id = %job_id, command = %command_line, "executing job");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut captured = String::from_utf8_lossy(&output.stdout).to_string();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        let captured = (!captured.is_empty()).then_some(captured);

        let status_code = output.status.code().unwrap_or(-1);
        let result = RunResult::new(job_id, run_at, clock.elapsed(), status_code, captured);
        self.storage.save_result(&result).await?;

        info!(job_id = %job_id, status_code, duration = ?result.duration, "job finished");
        Ok(result)
    }

    /// Get a reference to the storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}
