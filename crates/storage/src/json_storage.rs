//! JSON file storage implementation.
//!
//! Stores one JSON file per job under `jobs/` and one per run result under
//! `results/<job id>/`. Files are written to a temporary sibling and renamed
//! into place, so the orchestrator and its worker processes can share the
//! directory without observing half-written records. Job ids come from a
//! counter kept in `last_id.json` and are never handed out twice.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cronman_core::{Job, JobFilter, JobId, RunResult, Time};
use tokio::fs;
use tracing::debug;

use super::trait_::matches_command_or_id;
use super::{Result, Storage};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Open (and create if needed) a storage directory.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("jobs")).await?;
        fs::create_dir_all(root.join("results")).await?;

        Ok(Self { root })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{}.json", id))
    }

    fn results_dir(&self, job_id: JobId) -> PathBuf {
        self.root.join("results").join(job_id.to_string())
    }

    async fn all_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = list_dir(&self.root.join("jobs")).await?;
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    fn counter_path(&self) -> PathBuf {
        self.root.join("last_id.json")
    }

    async fn next_id(&self) -> Result<JobId> {
        let counter: Option<JobId> = read_json(&self.counter_path()).await?;
        // Stores written before the counter existed only have their job files
        let highest = self.all_jobs().await?.into_iter().filter_map(|j| j.id).max();
        let last = counter.max(highest);

        let id = last.map_or(JobId::new(1), JobId::next);
        write_json(&self.counter_path(), &id).await?;
        Ok(id)
    }

    async fn write_job(&self, job: &Job) -> Result<()> {
        let Some(id) = job.id else {
            return Err(super::StorageError::Other(format!("job {} has no id", job.command)));
        };
        write_json(&self.job_path(id), job).await
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn save_job(&mut self, job: &mut Job) -> Result<()> {
        if job.id.is_none() {
            job.id = Some(self.next_id().await?);
        }
        job.updated_at = chrono::Utc::now();
        self.write_job(job).await
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        read_json(&self.job_path(id)).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        Ok(self.all_jobs().await?
            .into_iter()
            .filter(|j| filter.matches(j))
            .collect())
    }

    async fn find_by_command(&self, command: &str, number: u32) -> Result<Option<Job>> {
        Ok(self.all_jobs().await?
            .into_iter()
            .find(|j| j.command == command && j.number == number))
    }

    async fn find_by_command_or_id(&self, needle: &str, tags: &[String]) -> Result<Vec<Job>> {
        Ok(self.all_jobs().await?
            .into_iter()
            .filter(|j| matches_command_or_id(j, needle))
            .filter(|j| tags.is_empty() || j.matches_any_tag(tags))
            .collect())
    }

    async fn delete_job(&mut self, id: JobId) -> Result<()> {
        ignore_missing(fs::remove_file(self.job_path(id)).await)?;
        ignore_missing(fs::remove_dir_all(self.results_dir(id)).await)?;

        for mut other in self.all_jobs().await? {
            if other.depends_on(id) {
                other.remove_dependency(id);
                self.write_job(&other).await?;
            }
        }

        debug!(job_id = %id, "job deleted");
        Ok(())
    }

    async fn save_result(&mut self, result: &RunResult) -> Result<()> {
        let dir = self.results_dir(result.job_id);
        fs::create_dir_all(&dir).await?;
        write_json(&dir.join(format!("{}.json", result.id)), result).await
    }

    async fn latest_result(&self, job_id: JobId) -> Result<Option<RunResult>> {
        Ok(self.list_results(job_id).await?.pop())
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<RunResult>> {
        let dir = self.results_dir(job_id);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut results: Vec<RunResult> = list_dir(&dir).await?;
        results.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.created_at.cmp(&b.created_at)));
        Ok(results)
    }

    async fn delete_results_older_than(&mut self, cutoff: Time) -> Result<usize> {
        let mut deleted = 0;
        let mut dirs = fs::read_dir(self.root.join("results")).await?;
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(dir.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                if let Ok(Some(result)) = read_json::<RunResult>(&entry.path()).await {
                    if result.created_at <= cutoff {
                        ignore_missing(fs::remove_file(entry.path()).await)?;
                        deleted += 1;
                    }
                }
            }
        }
        Ok(deleted)
    }
}

fn ignore_missing(res: std::io::Result<()>) -> std::io::Result<()> {
    res.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
    })
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Ok(Some(item)) = read_json(&entry.path()).await {
            items.push(item);
        }
    }
    Ok(items)
}
