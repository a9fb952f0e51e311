//! SQLite storage backend for cronman.
//!
//! Jobs, dependency edges and run results live in their own tables. Edge
//! and result ownership is enforced by foreign keys with `ON DELETE
//! CASCADE`, so deleting a job removes its results and every edge that
//! touches it without any bookkeeping in Rust.

use std::str::FromStr;

use async_trait::async_trait;
use cronman_core::{Job, JobFilter, JobId, RunResult, Time};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::warn;

use super::trait_::{Result, Storage};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the database at `url`, e.g.
    /// `sqlite://cronman.db`.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command TEXT NOT NULL,
                number INTEGER NOT NULL DEFAULT 1,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_dependencies (
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                depends_on_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                PRIMARY KEY (job_id, depends_on_id),
                CHECK (job_id <> depends_on_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_results (
                id TEXT PRIMARY KEY,
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                run_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_command ON jobs(command, number)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_job ON job_results(job_id, run_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<Job> {
        let data: String = row.try_get("data")?;
        let mut job: Job = serde_json::from_str(&data)?;
        let id: i64 = row.try_get("id")?;
        job.id = Some(JobId::new(id));

        let deps = sqlx::query(
            "SELECT depends_on_id FROM job_dependencies WHERE job_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        job.dependencies = deps
            .iter()
            .map(|r| r.try_get::<i64, _>("depends_on_id").map(JobId::new))
            .collect::<std::result::Result<_, _>>()?;

        Ok(job)
    }

    async fn hydrate_all(&self, rows: Vec<SqliteRow>) -> Result<Vec<Job>> {
        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.hydrate(row).await {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("skipping unreadable job row: {}", e),
            }
        }
        Ok(jobs)
    }

    fn parse_result(row: &SqliteRow) -> Result<RunResult> {
        let data: String = row.try_get("data")?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_job(&mut self, job: &mut Job) -> Result<()> {
        job.updated_at = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;

        let id = match job.id {
            Some(id) => id,
            None => {
                let inserted = sqlx::query(
                    "INSERT INTO jobs (command, number, data, updated_at) VALUES (?, ?, '{}', ?)",
                )
                .bind(&job.command)
                .bind(job.number)
                .bind(job.updated_at.timestamp_micros())
                .execute(&mut *tx)
                .await?;
                let id = JobId::new(inserted.last_insert_rowid());
                job.id = Some(id);
                id
            }
        };

        sqlx::query(
            "INSERT INTO jobs (id, command, number, data, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                command = excluded.command,
                number = excluded.number,
                data = excluded.data,
                updated_at = excluded.updated_at",
        )
        .bind(id.get())
        .bind(&job.command)
        .bind(job.number)
        .bind(serde_json::to_string(job)?)
        .bind(job.updated_at.timestamp_micros())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM job_dependencies WHERE job_id = ?")
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
        for (position, dep) in job.dependencies.iter().enumerate() {
            sqlx::query(
                "INSERT INTO job_dependencies (job_id, depends_on_id, position) VALUES (?, ?, ?)",
            )
            .bind(id.get())
            .bind(dep.get())
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT id, data FROM jobs WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT id, data FROM jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(self.hydrate_all(rows).await?
            .into_iter()
            .filter(|j| filter.matches(j))
            .collect())
    }

    async fn find_by_command(&self, command: &str, number: u32) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT id, data FROM jobs WHERE command = ? AND number = ? LIMIT 1")
            .bind(command)
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_command_or_id(&self, needle: &str, tags: &[String]) -> Result<Vec<Job>> {
        let id = needle.parse::<JobId>().map(JobId::get).unwrap_or(-1);
        let rows = sqlx::query("SELECT id, data FROM jobs WHERE command = ? OR id = ? ORDER BY id")
            .bind(needle)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        Ok(self.hydrate_all(rows).await?
            .into_iter()
            .filter(|j| tags.is_empty() || j.matches_any_tag(tags))
            .collect())
    }

    async fn delete_job(&mut self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_result(&mut self, result: &RunResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_results (id, job_id, run_at, created_at, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(result.id.to_string())
        .bind(result.job_id.get())
        .bind(result.run_at.timestamp_micros())
        .bind(result.created_at.timestamp_micros())
        .bind(serde_json::to_string(result)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_result(&self, job_id: JobId) -> Result<Option<RunResult>> {
        let row = sqlx::query(
            "SELECT data FROM job_results WHERE job_id = ?
             ORDER BY run_at DESC, created_at DESC LIMIT 1",
        )
        .bind(job_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_result).transpose()
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<RunResult>> {
        let rows = sqlx::query(
            "SELECT data FROM job_results WHERE job_id = ? ORDER BY run_at, created_at",
        )
        .bind(job_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_result).collect()
    }

    async fn delete_results_older_than(&mut self, cutoff: Time) -> Result<usize> {
        let done = sqlx::query("DELETE FROM job_results WHERE created_at <= ?")
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(command: &str) -> Job {
        Job::new(command, "* * * * *", Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_job_round_trip_keeps_dependency_order() {
        let mut storage = SqliteStorage::in_memory().await.unwrap();

        let mut a = job("app:a");
        let mut b = job("app:b");
        storage.save_job(&mut a).await.unwrap();
        storage.save_job(&mut b).await.unwrap();

        let mut c = job("app:c");
        c.add_dependency(b.id.unwrap());
        c.add_dependency(a.id.unwrap());
        storage.save_job(&mut c).await.unwrap();

        let loaded = storage.load_job(c.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.dependencies, vec![b.id.unwrap(), a.id.unwrap()]);
        assert_eq!(storage.list_jobs(&JobFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_schema_cascades_on_delete() {
        let mut storage = SqliteStorage::in_memory().await.unwrap();

        let mut a = job("app:a");
        storage.save_job(&mut a).await.unwrap();
        let mut b = job("app:b");
        b.add_dependency(a.id.unwrap());
        storage.save_job(&mut b).await.unwrap();
        storage
            .save_result(&RunResult::new(a.id.unwrap(), Utc::now(), std::time::Duration::ZERO, 0, None))
            .await
            .unwrap();

        storage.delete_job(a.id.unwrap()).await.unwrap();

        assert!(storage.latest_result(a.id.unwrap()).await.unwrap().is_none());
        let b = storage.load_job(b.id.unwrap()).await.unwrap().unwrap();
        assert!(b.dependencies.is_empty());
    }
}
