//! The discovery reconciler.
//!
//! ```text
//! Pass 1: materialize jobs → Pass 2: wire dependencies → Delete stale → Cycle check
//! ```
//!
//! Definitions sharing a command are told apart by declaration order only:
//! the n-th definition of a command binds to instance number n. Reordering
//! the source between scans can therefore rebind definitions to different
//! persisted instances.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use cronman_core::{Job, JobDefinition, JobFilter, JobId, Time};
use cronman_execution::DependencyResolver;
use cronman_storage::Storage;
use tracing::{debug, info, warn};

use crate::counter::JobCounter;
use crate::error::Result;
use crate::registry::CommandRegistry;
use crate::source::DefinitionSource;

/// Operator toggles for a scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Keep persisted jobs that are no longer declared
    pub keep_deleted: bool,
    /// Create new jobs disabled
    pub default_disabled: bool,
}

impl ScanOptions {
    /// Set `keep_deleted`.
    pub fn with_keep_deleted(mut self, keep_deleted: bool) -> Self {
        self.keep_deleted = keep_deleted;
        self
    }

    /// Set `default_disabled`.
    pub fn with_default_disabled(mut self, default_disabled: bool) -> Self {
        self.default_disabled = default_disabled;
        self
    }
}

/// A definition that could not be materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDefinition {
    /// Declared command
    pub command: String,
    /// Error message
    pub reason: String,
}

/// A dependency reference that did not map to a job.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedReference {
    /// Command of the declaring job
    pub job: String,
    /// Reference as declared
    pub reference: String,
}

/// A wired dependency edge, by command name.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    /// Job holding the edge
    pub dependent: String,
    /// Job depended upon
    pub dependency: String,
}

/// What a scan did.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Jobs created
    pub created: Vec<String>,
    /// Jobs whose schedule or instance ceiling changed
    pub updated: Vec<String>,
    /// Jobs matched without a schedule change
    pub unchanged: usize,
    /// Definitions rejected as misconfigured
    pub failed: Vec<FailedDefinition>,
    /// Dependency edges wired in pass 2
    pub edges: Vec<DependencyEdge>,
    /// References that did not resolve to a job
    pub unresolved: Vec<UnresolvedReference>,
    /// Jobs deleted because they are no longer declared
    pub deleted: Vec<String>,
    /// Cycle paths found after wiring
    pub cycles: Vec<String>,
}

impl ScanReport {
    fn reject(&mut self, definition: &JobDefinition, error: impl std::fmt::Display) {
        warn!(command = %definition.command, "skipping definition: {}", error);
        self.failed.push(FailedDefinition {
            command: definition.command.clone(),
            reason: error.to_string(),
        });
    }
}

/// Merges declared definitions into persisted jobs.
#[derive(Debug, Default)]
pub struct Reconciler {
    resolver: DependencyResolver,
    options: ScanOptions,
}

impl Reconciler {
    /// Create a reconciler with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan options.
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one discovery pass.
    pub async fn scan<S, D>(&self, storage: &mut S, source: &D, registry: &CommandRegistry) -> Result<ScanReport>
    where
        S: Storage,
        D: DefinitionSource + ?Sized,
    {
        let now = Utc::now();
        info!("Scan for cron jobs started at {}", now.to_rfc2822());

        let mut report = ScanReport::default();
        let definitions = source.definitions();

        // Every persisted instance starts out unmatched
        let mut unmatched: BTreeMap<(String, u32), JobId> = storage
            .list_jobs(&JobFilter::default())
            .await?
            .into_iter()
            .filter_map(|job| job.id.map(|id| ((job.command, job.number), id)))
            .collect();

        // Pass 1
        let mut materialized: HashMap<(String, u32), JobId> = HashMap::new();
        let mut targets: HashMap<String, JobId> = HashMap::new();
        let mut counter = JobCounter::new();

        for definition in &definitions {
            let number = counter.increase(&definition.command);
            let instance = (definition.command.clone(), number);
            // A misconfigured definition still claims its instance
            unmatched.remove(&instance);

            if let Err(e) = definition.validate() {
                report.reject(definition, e);
                continue;
            }

            let id = match storage.find_by_command(&definition.command, number).await? {
                Some(mut job) => {
                    let rescheduled = match apply_definition(&mut job, definition, now) {
                        Ok(rescheduled) => rescheduled,
                        Err(e) => {
                            report.reject(definition, e);
                            continue;
                        }
                    };
                    storage.save_job(&mut job).await?;
                    if rescheduled {
                        info!(command = %job.full_command(), "cronjob updated");
                        report.updated.push(job.full_command());
                    } else {
                        report.unchanged += 1;
                    }
                    job.id
                }
                None => {
                    let mut job = match new_job(definition, number, !self.options.default_disabled, now) {
                        Ok(job) => job,
                        Err(e) => {
                            report.reject(definition, e);
                            continue;
                        }
                    };
                    storage.save_job(&mut job).await?;
                    info!(command = %job.full_command(), period = %job.period, "found new job");
                    report.created.push(job.full_command());
                    job.id
                }
            };

            if let Some(id) = id {
                targets.entry(definition.command.clone()).or_insert(id);
                materialized.insert(instance, id);
            }
        }

        // Pass 2
        let mut counter = JobCounter::new();
        for definition in &definitions {
            let number = counter.increase(&definition.command);
            let Some(&id) = materialized.get(&(definition.command.clone(), number)) else {
                continue;
            };
            let Some(mut job) = storage.load_job(id).await? else {
                continue;
            };

            let previous = job.dependencies.clone();
            job.clear_dependencies();

            for reference in &definition.depends_on {
                let target = registry
                    .resolve(reference)
                    .and_then(|command| targets.get(command).map(|&id| (command, id)));

                let Some((dependency, dependency_id)) = target else {
                    warn!(command = %job.command, "job depends on `{}` which was not found", reference);
                    report.unresolved.push(UnresolvedReference {
                        job: job.command.clone(),
                        reference: reference.clone(),
                    });
                    continue;
                };

                if dependency_id == id {
                    warn!(command = %job.command, "ignoring dependency of a job on itself");
                    continue;
                }

                if job.add_dependency(dependency_id) {
                    debug!("`{}` depends on `{}`", job.command, dependency);
                    report.edges.push(DependencyEdge {
                        dependent: job.command.clone(),
                        dependency: dependency.to_string(),
                    });
                }
            }

            if job.dependencies != previous {
                storage.save_job(&mut job).await?;
            }
        }

        if !self.options.keep_deleted {
            for ((command, number), id) in unmatched {
                info!(command = %command, number, "deleting job");
                storage.delete_job(id).await?;
                report.deleted.push(command);
            }
        }

        let jobs = storage.list_jobs(&JobFilter::default()).await?;
        report.cycles = self.resolver.detect_cycles(&jobs);
        for cycle in &report.cycles {
            warn!("circular dependency detected: {}", cycle);
        }

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            "finished scanning for cron jobs"
        );
        Ok(report)
    }
}

/// Copy declared fields onto a persisted job. Returns whether the
/// schedule or the instance ceiling changed.
fn apply_definition(job: &mut Job, definition: &JobDefinition, now: Time) -> cronman_core::Result<bool> {
    job.description = definition.description.clone();
    job.arguments = definition.arguments.clone();
    job.tags = definition.tags.clone();
    job.dependency_mode = definition.dependency_mode;
    job.on_dependency_failure = definition.on_dependency_failure;

    let expression = definition.expression();
    if job.period == expression && job.max_instances == definition.max_instances {
        return Ok(false);
    }

    job.period = expression;
    job.max_instances = definition.max_instances;
    job.calculate_next_run(now)?;
    job.updated_at = now;
    Ok(true)
}

fn new_job(definition: &JobDefinition, number: u32, enabled: bool, now: Time) -> cronman_core::Result<Job> {
    let mut job = Job::new(definition.command.clone(), definition.expression(), now)?;
    job.arguments = definition.arguments.clone();
    job.description = definition.description.clone();
    job.max_instances = definition.max_instances;
    job.number = number;
    job.tags = definition.tags.clone();
    job.dependency_mode = definition.dependency_mode;
    job.on_dependency_failure = definition.on_dependency_failure;
    job.enabled = enabled;
    Ok(job)
}
