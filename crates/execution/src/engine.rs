//! The run orchestrator - one scheduling tick over every job.

use std::time::Duration;

use chrono::Utc;
use cronman_core::{DependencyFailureMode, Job, JobFilter, JobId, Time};
use cronman_storage::Storage;
use tracing::{debug, error, info, warn};

use crate::dependency::{DependencyResolver, Resolution};
use crate::error::Result;
use crate::process::{ProcessSpawner, ProcessState, WorkerProcess};

/// Configuration for the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between supervision sweeps
    pub poll_interval: Duration,
    /// Delete run results older than this before each tick
    pub result_retention: Option<chrono::Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            result_retention: None,
        }
    }
}

impl EngineConfig {
    /// Set the supervision sweep delay.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Keep run results for `hours` hours.
    pub fn with_result_retention_hours(mut self, hours: Option<u32>) -> Self {
        self.result_retention = hours.map(|h| chrono::Duration::hours(i64::from(h)));
        self
    }
}

/// The run orchestrator.
///
/// Each tick:
/// ```text
/// Prune results → Select due jobs → Check dependencies → Launch → Supervise
/// ```
/// Launching never waits on a worker; the tick returns once every worker
/// it started has been observed to exit.
pub struct ExecutionEngine<S: Storage> {
    storage: S,
    spawner: Box<dyn ProcessSpawner>,
    resolver: DependencyResolver,
    config: EngineConfig,
}

impl<S: Storage> ExecutionEngine<S> {
    /// Create a new execution engine.
    pub fn new(storage: S, spawner: Box<dyn ProcessSpawner>) -> Self {
        Self {
            storage,
            spawner,
            resolver: DependencyResolver::default(),
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one full tick: launch what is due, then wait for it.
    pub async fn run_tick(&mut self) -> Result<TickReport> {
        let (mut report, in_flight) = self.launch(Utc::now()).await?;
        report.completions = self.supervise(in_flight).await;
        Ok(report)
    }

    /// First half of a tick: decide and start workers for every job.
    pub async fn launch(&mut self, now: Time) -> Result<(TickReport, Vec<InFlight>)> {
        let pruned = match self.config.result_retention {
            Some(retention) => {
                let pruned = self.storage.delete_results_older_than(now - retention).await?;
                if pruned > 0 {
                    info!("Pruned {} run results older than {}", pruned, now - retention);
                }
                pruned
            }
            None => 0,
        };

        let jobs = self.storage.list_jobs(&JobFilter::default()).await?;
        info!("Cron jobs started at {}, found {} jobs", now.to_rfc2822(), jobs.len());

        let mut report = TickReport {
            started_at: now,
            jobs_found: jobs.len(),
            results_pruned: pruned,
            outcomes: Vec::with_capacity(jobs.len()),
            completions: Vec::new(),
        };
        let mut in_flight = Vec::new();

        for job in jobs {
            let outcome = match self.consider(&job, now, &mut in_flight).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(command = %job.full_command(), "job processing failed: {}", e);
                    JobOutcome::Failed(e.to_string())
                }
            };
            report.outcomes.push(JobReport {
                job_id: job.id,
                command: job.full_command(),
                outcome,
            });
        }

        Ok((report, in_flight))
    }

    async fn consider(&mut self, job: &Job, now: Time, in_flight: &mut Vec<InFlight>) -> Result<JobOutcome> {
        let Some(id) = job.id else {
            return Ok(JobOutcome::Failed("job has no id".to_string()));
        };

        if !job.enabled {
            debug!(job_id = %id, "cronjob is disabled");
            return Ok(JobOutcome::Disabled);
        }

        if !job.is_due(now) {
            debug!(job_id = %id, next_run = %job.next_run, "cronjob is not due");
            return Ok(JobOutcome::NotDue { next_run: job.next_run });
        }

        if !job.has_capacity() {
            debug!(job_id = %id, "maximum number of instances reached");
            return Ok(JobOutcome::AtCapacity);
        }

        let mut forced = false;
        if let Resolution::Unsatisfied { reason, .. } = self.resolver.can_run(&self.storage, job).await {
            match job.on_dependency_failure {
                DependencyFailureMode::Skip => {
                    debug!(job_id = %id, "{}", reason);
                    return Ok(JobOutcome::DependenciesUnmet { reason });
                }
                DependencyFailureMode::Disable => {
                    if let Some(mut fresh) = self.storage.load_job(id).await? {
                        fresh.disable();
                        self.storage.save_job(&mut fresh).await?;
                    }
                    warn!(job_id = %id, "{}; job has been disabled", reason);
                    return Ok(JobOutcome::DisabledByDependency { reason });
                }
                DependencyFailureMode::Run => {
                    info!(job_id = %id, "{}; running anyway", reason);
                    forced = true;
                }
            }
        }

        // Another actor may have touched the job since the listing
        let Some(mut fresh) = self.storage.load_job(id).await? else {
            return Ok(JobOutcome::Failed("job no longer exists".to_string()));
        };
        if !fresh.has_capacity() {
            return Ok(JobOutcome::AtCapacity);
        }
        fresh.increase_running_instances();
        fresh.last_run_at = Some(now);
        self.storage.save_job(&mut fresh).await?;

        match self.spawner.spawn(id) {
            Ok(process) => {
                info!(job_id = %id, command = %fresh.full_command(), "cronjob started in background");
                in_flight.push(InFlight {
                    job_id: id,
                    command: fresh.full_command(),
                    process,
                });
                Ok(JobOutcome::Launched { forced })
            }
            Err(e) => {
                error!(job_id = %id, "failed to start worker: {}", e);
                if let Some(mut fresh) = self.storage.load_job(id).await? {
                    fresh.decrease_running_instances();
                    self.storage.save_job(&mut fresh).await?;
                }
                Ok(JobOutcome::LaunchFailed(e.to_string()))
            }
        }
    }

    /// Second half of a tick: poll workers until all have exited.
    pub async fn supervise(&mut self, mut in_flight: Vec<InFlight>) -> Vec<Completion> {
        let mut completions = Vec::new();
        if !in_flight.is_empty() {
            info!("waiting for {} running jobs", in_flight.len());
        }

        while !in_flight.is_empty() {
            let mut pending = Vec::with_capacity(in_flight.len());

            for mut entry in in_flight.drain(..) {
                match entry.process.poll() {
                    ProcessState::Running => pending.push(entry),
                    ProcessState::TimedOut => {
                        debug!(job_id = %entry.job_id, "worker timed out, waiting for it to stop");
                        pending.push(entry);
                    }
                    ProcessState::Exited(code) => {
                        info!(job_id = %entry.job_id, exit_code = ?code, "cronjob finished");
                        let finished_at = Utc::now();
                        self.finish(entry.job_id, finished_at).await;
                        completions.push(Completion {
                            job_id: entry.job_id,
                            command: entry.command,
                            exit_code: code,
                            finished_at,
                        });
                    }
                }
            }

            in_flight = pending;
            if !in_flight.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        completions
    }

    /// Release an instance and reschedule once none are left.
    async fn finish(&mut self, id: JobId, finished_at: Time) {
        let mut job = match self.storage.load_job(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %id, "finished job no longer exists");
                return;
            }
            Err(e) => {
                error!(job_id = %id, "could not reload finished job: {}", e);
                return;
            }
        };

        job.decrease_running_instances();
        if job.running_instances == 0 {
            if let Err(e) = job.calculate_next_run(finished_at) {
                error!(job_id = %id, "could not reschedule: {}", e);
            }
        }

        if let Err(e) = self.storage.save_job(&mut job).await {
            error!(job_id = %id, "could not save finished job: {}", e);
        }
    }

    /// Get a reference to the storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Get a mutable reference to the storage.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

/// A launched worker awaiting supervision.
pub struct InFlight {
    job_id: JobId,
    command: String,
    process: Box<dyn WorkerProcess>,
}

impl InFlight {
    /// Job the worker runs.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

/// What a tick decided for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Job is disabled
    Disabled,
    /// Next run is still in the future
    NotDue {
        /// When the job is due
        next_run: Time,
    },
    /// `running_instances` already at `max_instances`
    AtCapacity,
    /// Dependencies unmet, skipped this tick
    DependenciesUnmet {
        /// Resolver explanation
        reason: String,
    },
    /// Dependencies unmet, job disabled
    DisabledByDependency {
        /// Resolver explanation
        reason: String,
    },
    /// Worker started; `forced` when dependencies were unmet
    Launched {
        /// Started despite unmet dependencies
        forced: bool,
    },
    /// Worker could not be started
    LaunchFailed(String),
    /// Processing this job failed
    Failed(String),
}

/// Outcome for one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Job id
    pub job_id: Option<JobId>,
    /// Full command line
    pub command: String,
    /// Decision
    pub outcome: JobOutcome,
}

/// A worker observed to have exited.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Job id
    pub job_id: JobId,
    /// Full command line
    pub command: String,
    /// Exit code if known
    pub exit_code: Option<i32>,
    /// When the exit was observed
    pub finished_at: Time,
}

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Instant the tick evaluated jobs against
    pub started_at: Time,
    /// Number of jobs considered
    pub jobs_found: usize,
    /// Results removed by retention
    pub results_pruned: usize,
    /// Per-job decisions, in listing order
    pub outcomes: Vec<JobReport>,
    /// Workers observed to exit
    pub completions: Vec<Completion>,
}

impl TickReport {
    /// Number of workers started.
    pub fn launched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, JobOutcome::Launched { .. }))
            .count()
    }

    /// Outcome recorded for `command`, if any.
    pub fn outcome_of(&self, command: &str) -> Option<&JobOutcome> {
        self.outcomes.iter().find(|r| r.command == command).map(|r| &r.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronman_core::{DependencyMode, RunResult};
    use cronman_storage::MemoryStorage;
    use std::sync::{Arc, Mutex};

    /// Worker that reports `Running` (or `TimedOut`) a fixed number of
    /// times before exiting.
    struct ScriptedProcess {
        remaining: usize,
        timed_out: bool,
        exit_code: i32,
    }

    impl WorkerProcess for ScriptedProcess {
        fn poll(&mut self) -> ProcessState {
            if self.remaining == 0 {
                return ProcessState::Exited(Some(self.exit_code));
            }
            self.remaining -= 1;
            if self.timed_out { ProcessState::TimedOut } else { ProcessState::Running }
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedSpawner {
        spawned: Arc<Mutex<Vec<JobId>>>,
        polls: usize,
        timed_out: bool,
        fail: bool,
    }

    impl ProcessSpawner for ScriptedSpawner {
        fn spawn(&self, job_id: JobId) -> std::io::Result<Box<dyn WorkerProcess>> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"));
            }
            self.spawned.lock().unwrap().push(job_id);
            Ok(Box::new(ScriptedProcess {
                remaining: self.polls,
                timed_out: self.timed_out,
                exit_code: 0,
            }))
        }
    }

    fn due_job(command: &str) -> Job {
        let now = Utc::now();
        let mut job = Job::new(command, "* * * * *", now).unwrap();
        job.next_run = now - chrono::Duration::seconds(5);
        job
    }

    fn engine(storage: MemoryStorage, spawner: &ScriptedSpawner) -> ExecutionEngine<MemoryStorage> {
        ExecutionEngine::new(storage, Box::new(spawner.clone()))
            .with_config(EngineConfig::default().with_poll_interval(Duration::from_millis(1)))
    }

    async fn save(storage: &mut MemoryStorage, mut job: Job) -> JobId {
        storage.save_job(&mut job).await.unwrap();
        job.id.unwrap()
    }

    #[tokio::test]
    async fn test_due_job_launches_once_and_reschedules() {
        let mut storage = MemoryStorage::new();
        let id = save(&mut storage, due_job("app:a")).await;
        let spawner = ScriptedSpawner { polls: 2, ..Default::default() };
        let mut engine = engine(storage, &spawner);

        let (report, in_flight) = engine.launch(Utc::now()).await.unwrap();
        assert_eq!(report.launched(), 1);
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].job_id(), id);

        let running = engine.storage().load_job(id).await.unwrap().unwrap();
        assert_eq!(running.running_instances, 1);
        assert!(running.last_run_at.is_some());

        let completions = engine.supervise(in_flight).await;
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].exit_code, Some(0));

        let done = engine.storage().load_job(id).await.unwrap().unwrap();
        assert_eq!(done.running_instances, 0);
        assert!(done.next_run > completions[0].finished_at);
        assert_eq!(spawner.spawned.lock().unwrap().as_slice(), &[id]);
    }

    #[tokio::test]
    async fn test_skips_disabled_not_due_and_full() {
        let mut storage = MemoryStorage::new();

        let mut disabled = due_job("app:disabled");
        disabled.disable();
        save(&mut storage, disabled).await;

        let mut later = due_job("app:later");
        later.next_run = Utc::now() + chrono::Duration::hours(1);
        save(&mut storage, later).await;

        let mut full = due_job("app:full");
        full.running_instances = 1;
        let full_id = save(&mut storage, full).await;

        let spawner = ScriptedSpawner::default();
        let mut engine = engine(storage, &spawner);
        let report = engine.run_tick().await.unwrap();

        assert_eq!(report.jobs_found, 3);
        assert_eq!(report.launched(), 0);
        assert!(report.completions.is_empty());
        assert_eq!(report.outcome_of("app:disabled"), Some(&JobOutcome::Disabled));
        assert!(matches!(report.outcome_of("app:later"), Some(JobOutcome::NotDue { .. })));
        assert_eq!(report.outcome_of("app:full"), Some(&JobOutcome::AtCapacity));
        assert!(spawner.spawned.lock().unwrap().is_empty());

        // Counter untouched
        let full = engine.storage().load_job(full_id).await.unwrap().unwrap();
        assert_eq!(full.running_instances, 1);
    }

    #[tokio::test]
    async fn test_sequential_ticks_respect_max_instances() {
        let mut storage = MemoryStorage::new();
        let id = save(&mut storage, due_job("app:a")).await;
        let spawner = ScriptedSpawner::default();
        let mut engine = engine(storage, &spawner);

        let (_, first) = engine.launch(Utc::now()).await.unwrap();
        // Still running when the next tick evaluates
        let (second, more) = engine.launch(Utc::now()).await.unwrap();
        assert!(more.is_empty());
        assert_eq!(second.outcome_of("app:a"), Some(&JobOutcome::AtCapacity));

        engine.supervise(first).await;
        let job = engine.storage().load_job(id).await.unwrap().unwrap();
        assert_eq!(job.running_instances, 0);
        assert_eq!(spawner.spawned.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unmet_dependency_skips() {
        let mut storage = MemoryStorage::new();
        let a = save(&mut storage, {
            let mut a = due_job("app:a");
            a.next_run = Utc::now() + chrono::Duration::hours(1);
            a
        })
        .await;
        let mut b = due_job("app:b");
        b.add_dependency(a);
        let b_id = save(&mut storage, b).await;

        let spawner = ScriptedSpawner::default();
        let mut engine = engine(storage, &spawner);
        let report = engine.run_tick().await.unwrap();

        match report.outcome_of("app:b") {
            Some(JobOutcome::DependenciesUnmet { reason }) => assert!(reason.contains("AND")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(spawner.spawned.lock().unwrap().is_empty());
        assert!(engine.storage().load_job(b_id).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_unmet_dependency_disables() {
        let mut storage = MemoryStorage::new();
        let a = save(&mut storage, {
            let mut a = due_job("app:a");
            a.disable();
            a
        })
        .await;
        let mut b = due_job("app:b");
        b.add_dependency(a);
        b.on_dependency_failure = DependencyFailureMode::Disable;
        let b_id = save(&mut storage, b).await;

        let spawner = ScriptedSpawner::default();
        let mut engine = engine(storage, &spawner);
        let report = engine.run_tick().await.unwrap();

        assert!(matches!(report.outcome_of("app:b"), Some(JobOutcome::DisabledByDependency { .. })));
        assert!(!engine.storage().load_job(b_id).await.unwrap().unwrap().enabled);
        assert!(spawner.spawned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmet_dependency_runs_anyway() {
        let mut storage = MemoryStorage::new();
        let a = save(&mut storage, {
            let mut a = due_job("app:a");
            a.disable();
            a
        })
        .await;
        let mut b = due_job("app:b");
        b.add_dependency(a);
        b.on_dependency_failure = DependencyFailureMode::Run;
        let b_id = save(&mut storage, b).await;

        let spawner = ScriptedSpawner::default();
        let mut engine = engine(storage, &spawner);
        let report = engine.run_tick().await.unwrap();

        assert_eq!(report.outcome_of("app:b"), Some(&JobOutcome::Launched { forced: true }));
        assert_eq!(spawner.spawned.lock().unwrap().as_slice(), &[b_id]);
    }

    #[tokio::test]
    async fn test_satisfied_or_dependency_launches() {
        let mut storage = MemoryStorage::new();
        let mut idle = due_job("app:idle");
        idle.disable();
        let idle = save(&mut storage, idle).await;
        let mut done = due_job("app:done");
        done.disable();
        let done = save(&mut storage, done).await;
        storage
            .save_result(&RunResult::new(done, Utc::now(), Duration::ZERO, 0, None))
            .await
            .unwrap();

        let mut c = due_job("app:c");
        c.add_dependency(idle);
        c.add_dependency(done);
        c.dependency_mode = DependencyMode::Or;
        save(&mut storage, c).await;

        let spawner = ScriptedSpawner::default();
        let mut engine = engine(storage, &spawner);
        let report = engine.run_tick().await.unwrap();

        assert_eq!(report.outcome_of("app:c"), Some(&JobOutcome::Launched { forced: false }));
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_still_running() {
        let mut storage = MemoryStorage::new();
        let id = save(&mut storage, due_job("app:slow")).await;
        let spawner = ScriptedSpawner { polls: 3, timed_out: true, ..Default::default() };
        let mut engine = engine(storage, &spawner);

        let report = engine.run_tick().await.unwrap();

        assert_eq!(report.completions.len(), 1);
        assert_eq!(engine.storage().load_job(id).await.unwrap().unwrap().running_instances, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_instance() {
        let mut storage = MemoryStorage::new();
        let id = save(&mut storage, due_job("app:a")).await;
        let spawner = ScriptedSpawner { fail: true, ..Default::default() };
        let mut engine = engine(storage, &spawner);

        let report = engine.run_tick().await.unwrap();

        assert!(matches!(report.outcome_of("app:a"), Some(JobOutcome::LaunchFailed(_))));
        assert_eq!(engine.storage().load_job(id).await.unwrap().unwrap().running_instances, 0);
    }

    #[tokio::test]
    async fn test_retention_prunes_before_tick() {
        let mut storage = MemoryStorage::new();
        let mut idle = due_job("app:idle");
        idle.disable();
        let id = save(&mut storage, idle).await;
        let mut old = RunResult::new(id, Utc::now(), Duration::ZERO, 0, None);
        old.created_at = Utc::now() - chrono::Duration::hours(48);
        storage.save_result(&old).await.unwrap();
        storage
            .save_result(&RunResult::new(id, Utc::now(), Duration::ZERO, 0, None))
            .await
            .unwrap();

        let spawner = ScriptedSpawner::default();
        let mut engine = ExecutionEngine::new(storage, Box::new(spawner))
            .with_config(EngineConfig::default().with_result_retention_hours(Some(24)));
        let report = engine.run_tick().await.unwrap();

        assert_eq!(report.results_pruned, 1);
        assert_eq!(engine.storage().list_results(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_tick_returns_immediately() {
        let spawner = ScriptedSpawner::default();
        let mut engine = engine(MemoryStorage::new(), &spawner);

        let report = engine.run_tick().await.unwrap();
        assert_eq!(report.jobs_found, 0);
        assert!(report.completions.is_empty());
    }
}
