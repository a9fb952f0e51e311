//! Job model - the schedulable unit of recurring work.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::JobId;
use crate::schedule;
use crate::Time;

/// A recurring job bound to a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Storage identity, `None` until first saved
    pub id: Option<JobId>,

    /// Command to execute
    pub command: String,

    /// Extra arguments appended to the command
    pub arguments: Option<String>,

    /// Human readable description
    pub description: Option<String>,

    /// Schedule expression
    pub period: String,

    /// Next trigger instant, derived from `period`
    pub next_run: Time,

    /// Start of the most recent launch
    pub last_run_at: Option<Time>,

    /// Concurrency ceiling (>= 1)
    pub max_instances: u32,

    /// Instances currently in flight
    pub running_instances: u32,

    /// Occurrence number among jobs sharing the same command
    pub number: u32,

    /// Whether the orchestrator may launch this job
    pub enabled: bool,

    /// Selection tags
    pub tags: Vec<String>,

    /// Jobs this one depends on, in declaration order
    pub dependencies: Vec<JobId>,

    /// How dependency outcomes are combined
    #[serde(default)]
    pub dependency_mode: DependencyMode,

    /// What to do when dependencies are not satisfied
    #[serde(default)]
    pub on_dependency_failure: DependencyFailureMode,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Job {
    /// Create an unsaved, enabled job with its first `next_run` computed
    /// from `now`.
    pub fn new(command: impl Into<String>, period: impl Into<String>, now: Time) -> Result<Self> {
        let period = period.into();
        let next_run = schedule::next_after(&period, now)?;

        Ok(Self {
            id: None,
            command: command.into(),
            arguments: None,
            description: None,
            period,
            next_run,
            last_run_at: None,
            max_instances: 1,
            running_instances: 0,
            number: 1,
            enabled: true,
            tags: Vec::new(),
            dependencies: Vec::new(),
            dependency_mode: DependencyMode::And,
            on_dependency_failure: DependencyFailureMode::Skip,
            created_at: now,
            updated_at: now,
        })
    }

    /// Command line including arguments.
    pub fn full_command(&self) -> String {
        match &self.arguments {
            Some(args) if !args.is_empty() => format!("{} {}", self.command, args),
            _ => self.command.clone(),
        }
    }

    /// Recompute `next_run` as the first trigger after `now`.
    pub fn calculate_next_run(&mut self, now: Time) -> Result<()> {
        self.next_run = schedule::next_after(&self.period, now)?;
        Ok(())
    }

    /// Whether the job is due at `now`.
    pub fn is_due(&self, now: Time) -> bool {
        self.next_run <= now
    }

    /// Whether another instance may start.
    pub fn has_capacity(&self) -> bool {
        self.running_instances < self.max_instances
    }

    /// Register one more in-flight instance.
    pub fn increase_running_instances(&mut self) {
        self.running_instances += 1;
    }

    /// Release one in-flight instance.
    pub fn decrease_running_instances(&mut self) {
        self.running_instances = self.running_instances.saturating_sub(1);
    }

    /// Allow the orchestrator to launch this job.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop the orchestrator from launching this job.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Add a dependency edge. Duplicates and self references are ignored;
    /// returns whether the edge was added.
    pub fn add_dependency(&mut self, dependency: JobId) -> bool {
        if self.id == Some(dependency) || self.dependencies.contains(&dependency) {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    /// Remove a dependency edge if present.
    pub fn remove_dependency(&mut self, dependency: JobId) {
        self.dependencies.retain(|d| *d != dependency);
    }

    /// Drop every dependency edge.
    pub fn clear_dependencies(&mut self) {
        self.dependencies.clear();
    }

    /// Whether this job depends on `other`.
    pub fn depends_on(&self, other: JobId) -> bool {
        self.dependencies.contains(&other)
    }

    /// True if the job carries every tag in `tags`. An empty list matches.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    /// True if the job carries at least one tag in `tags`.
    pub fn matches_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command)
    }
}

/// Combinator applied across a job's dependency outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// Every dependency must be satisfied
    #[default]
    And,
    /// At least one dependency must be satisfied
    Or,
}

impl std::fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// Policy applied when dependencies are not satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyFailureMode {
    /// Do not run this tick
    #[default]
    Skip,
    /// Run anyway, ignoring dependencies
    Run,
    /// Disable the job permanently and do not run
    Disable,
}

impl std::fmt::Display for DependencyFailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Run => f.write_str("run"),
            Self::Disable => f.write_str("disable"),
        }
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Keep jobs carrying any of these tags
    pub tags: Option<Vec<String>>,

    /// Keep jobs with this enabled flag
    pub enabled: Option<bool>,
}

impl JobFilter {
    /// Filter on tags (match-any).
    pub fn with_tags(tags: Vec<String>) -> Self {
        Self {
            tags: Some(tags),
            ..Default::default()
        }
    }

    /// Whether `job` passes the filter.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(tags) = &self.tags {
            if !job.matches_any_tag(tags) {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if job.enabled != enabled {
                return false;
            }
        }
        true
    }
}
