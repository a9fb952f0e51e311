//! In-memory storage backend.
//!
//! Keeps everything in maps; nothing survives the process. Used by tests
//! and by embedders that persist elsewhere.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cronman_core::{Job, JobFilter, JobId, RunResult, Time};

use super::trait_::matches_command_or_id;
use super::{Result, Storage};

/// Map-backed storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    jobs: BTreeMap<JobId, Job>,
    results: Vec<RunResult>,
    last_id: i64,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_job(&mut self, job: &mut Job) -> Result<()> {
        let id = match job.id {
            Some(id) => id,
            None => {
                self.last_id += 1;
                let id = JobId::new(self.last_id);
                job.id = Some(id);
                id
            }
        };
        job.updated_at = chrono::Utc::now();
        self.jobs.insert(id, job.clone());
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        Ok(self.jobs.values().filter(|j| filter.matches(j)).cloned().collect())
    }

    async fn find_by_command(&self, command: &str, number: u32) -> Result<Option<Job>> {
        Ok(self.jobs
            .values()
            .find(|j| j.command == command && j.number == number)
            .cloned())
    }

    async fn find_by_command_or_id(&self, needle: &str, tags: &[String]) -> Result<Vec<Job>> {
        Ok(self.jobs
            .values()
            .filter(|j| matches_command_or_id(j, needle))
            .filter(|j| tags.is_empty() || j.matches_any_tag(tags))
            .cloned()
            .collect())
    }

    async fn delete_job(&mut self, id: JobId) -> Result<()> {
        self.jobs.remove(&id);
        self.results.retain(|r| r.job_id != id);
        for other in self.jobs.values_mut() {
            other.remove_dependency(id);
        }
        Ok(())
    }

    async fn save_result(&mut self, result: &RunResult) -> Result<()> {
        self.results.push(result.clone());
        Ok(())
    }

    async fn latest_result(&self, job_id: JobId) -> Result<Option<RunResult>> {
        Ok(self.list_results(job_id).await?.pop())
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<RunResult>> {
        let mut results: Vec<_> = self.results.iter().filter(|r| r.job_id == job_id).cloned().collect();
        results.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.created_at.cmp(&b.created_at)));
        Ok(results)
    }

    async fn delete_results_older_than(&mut self, cutoff: Time) -> Result<usize> {
        let before = self.results.len();
        self.results.retain(|r| r.created_at > cutoff);
        Ok(before - self.results.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_delete_removes_inbound_edges() {
        let mut storage = MemoryStorage::new();
        let mut a = Job::new("a", "@daily", Utc::now()).unwrap();
        let mut b = Job::new("b", "@daily", Utc::now()).unwrap();
        storage.save_job(&mut a).await.unwrap();
        b.add_dependency(a.id.unwrap());
        storage.save_job(&mut b).await.unwrap();

        storage.delete_job(a.id.unwrap()).await.unwrap();

        let b = storage.load_job(b.id.unwrap()).await.unwrap().unwrap();
        assert!(b.dependencies.is_empty());
        assert_eq!(storage.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let mut storage = MemoryStorage::new();
        let mut a = Job::new("a", "@daily", Utc::now()).unwrap();
        storage.save_job(&mut a).await.unwrap();
        storage.delete_job(a.id.unwrap()).await.unwrap();

        let mut b = Job::new("b", "@daily", Utc::now()).unwrap();
        storage.save_job(&mut b).await.unwrap();
        assert_eq!(b.id, Some(JobId::new(2)));
    }
}
