//! Dependency resolution for jobs.

use cronman_core::{DependencyMode, Job, JobId};
use cronman_storage::Storage;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Result of dependency resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// All dependencies satisfied, ready to execute
    Ready,
    /// Dependencies not satisfied under the job's mode
    Unsatisfied {
        /// Mode the dependencies were combined with
        mode: DependencyMode,
        /// Human readable explanation
        reason: String,
    },
}

impl Resolution {
    /// Whether the job may run.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Why the job may not run, if it may not.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ready => None,
            Self::Unsatisfied { reason, .. } => Some(reason),
        }
    }
}

/// Resolves job dependencies.
///
/// Pure graph logic: it reads run results but never mutates anything and
/// never fails. Missing data (a dependency that never ran, a lookup error)
/// counts as "not satisfied". Applying the job's failure policy is up to
/// the caller.
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Check whether `job`'s dependencies allow it to run.
    pub async fn can_run(&self, storage: &dyn Storage, job: &Job) -> Resolution {
        if job.dependencies.is_empty() {
            return Resolution::Ready;
        }

        let mut statuses = Vec::with_capacity(job.dependencies.len());
        for dep_id in &job.dependencies {
            statuses.push(self.is_satisfied(storage, *dep_id).await);
        }

        let satisfied = match job.dependency_mode {
            DependencyMode::And => statuses.iter().all(|s| *s),
            DependencyMode::Or => statuses.iter().any(|s| *s),
        };

        if satisfied {
            Resolution::Ready
        } else {
            Resolution::Unsatisfied {
                mode: job.dependency_mode,
                reason: format!("Dependencies not satisfied (mode: {})", job.dependency_mode),
            }
        }
    }

    /// A dependency is satisfied when its latest run exited with 0.
    async fn is_satisfied(&self, storage: &dyn Storage, dep_id: JobId) -> bool {
        match storage.latest_result(dep_id).await {
            Ok(Some(result)) => result.is_success(),
            // Never run = not satisfied
            Ok(None) => false,
            Err(e) => {
                warn!(job_id = %dep_id, "could not load latest result: {}", e);
                false
            }
        }
    }

    /// Detect dependency cycles across `jobs`.
    ///
    /// Depth-first over the whole set. Each entry is the command path from
    /// the traversal root to the back-edge target, joined with ` -> `. At
    /// most one cycle is reported per traversal root; nodes already fully
    /// visited are not searched again. Jobs without an id are skipped.
    pub fn detect_cycles(&self, jobs: &[Job]) -> Vec<String> {
        let by_id: HashMap<JobId, &Job> = jobs
            .iter()
            .filter_map(|j| j.id.map(|id| (id, j)))
            .collect();

        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();

        for job in jobs {
            let Some(id) = job.id else { continue };
            if visited.contains(&id) {
                continue;
            }
            if let Some(path) = visit(job, &by_id, &mut visited, &mut on_stack, Vec::new()) {
                cycles.push(path.join(" -> "));
            }
            on_stack.clear();
        }

        cycles
    }

    /// Jobs in `all_jobs` whose dependency set contains `job`.
    pub fn reverse_dependents<'a>(&self, job: &Job, all_jobs: &'a [Job]) -> Vec<&'a Job> {
        let Some(id) = job.id else {
            return Vec::new();
        };
        all_jobs.iter().filter(|other| other.depends_on(id)).collect()
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn visit(
    job: &Job,
    by_id: &HashMap<JobId, &Job>,
    visited: &mut HashSet<JobId>,
    on_stack: &mut HashSet<JobId>,
    mut path: Vec<String>,
) -> Option<Vec<String>> {
    let id = job.id?;

    visited.insert(id);
    on_stack.insert(id);
    path.push(job.command.clone());

    for dep_id in &job.dependencies {
        let Some(dep) = by_id.get(dep_id) else {
            continue;
        };

        if !visited.contains(dep_id) {
            if let Some(found) = visit(dep, by_id, visited, on_stack, path.clone()) {
                return Some(found);
            }
        } else if on_stack.contains(dep_id) {
            path.push(dep.command.clone());
            return Some(path);
        }
    }

    on_stack.remove(&id);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cronman_core::RunResult;
    use cronman_storage::MemoryStorage;

    fn job(id: i64, command: &str, deps: &[i64]) -> Job {
        let mut job = Job::new(command, "* * * * *", Utc::now()).unwrap();
        job.id = Some(JobId::new(id));
        job.dependencies = deps.iter().copied().map(JobId::new).collect();
        job
    }

    async fn record(storage: &mut MemoryStorage, id: i64, status: i32) {
        storage
            .save_result(&RunResult::new(JobId::new(id), Utc::now(), std::time::Duration::ZERO, status, None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_dependencies_is_ready() {
        let storage = MemoryStorage::new();
        let resolver = DependencyResolver::new();

        assert_eq!(resolver.can_run(&storage, &job(1, "a", &[])).await, Resolution::Ready);
    }

    #[tokio::test]
    async fn test_never_run_dependency_is_unsatisfied() {
        let storage = MemoryStorage::new();
        let resolver = DependencyResolver::new();

        let mut b = job(2, "b", &[1]);
        let res = resolver.can_run(&storage, &b).await;
        assert!(!res.is_ready());
        assert!(res.reason().unwrap().contains("AND"));

        b.dependency_mode = DependencyMode::Or;
        let res = resolver.can_run(&storage, &b).await;
        assert!(res.reason().unwrap().contains("OR"));
    }

    #[tokio::test]
    async fn test_and_requires_all() {
        let mut storage = MemoryStorage::new();
        let resolver = DependencyResolver::new();
        record(&mut storage, 1, 0).await;
        record(&mut storage, 2, 1).await;

        let c = job(3, "c", &[1, 2]);
        assert!(!resolver.can_run(&storage, &c).await.is_ready());

        record(&mut storage, 2, 0).await;
        assert!(resolver.can_run(&storage, &c).await.is_ready());
    }

    #[tokio::test]
    async fn test_or_requires_any() {
        let mut storage = MemoryStorage::new();
        let resolver = DependencyResolver::new();
        record(&mut storage, 1, 2).await;

        let mut c = job(3, "c", &[1, 2]);
        c.dependency_mode = DependencyMode::Or;
        assert!(!resolver.can_run(&storage, &c).await.is_ready());

        record(&mut storage, 2, 0).await;
        assert!(resolver.can_run(&storage, &c).await.is_ready());
    }

    #[tokio::test]
    async fn test_only_latest_result_counts() {
        let mut storage = MemoryStorage::new();
        let resolver = DependencyResolver::new();
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        storage
            .save_result(&RunResult::new(JobId::new(1), earlier, std::time::Duration::ZERO, 0, None))
            .await
            .unwrap();
        record(&mut storage, 1, 1).await;

        assert!(!resolver.can_run(&storage, &job(2, "b", &[1])).await.is_ready());
    }

    #[test]
    fn test_mutual_dependency_is_one_cycle() {
        let resolver = DependencyResolver::new();
        let jobs = vec![job(1, "a", &[2]), job(2, "b", &[1])];

        let cycles = resolver.detect_cycles(&jobs);
        assert_eq!(cycles, vec!["a -> b -> a".to_string()]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let resolver = DependencyResolver::new();
        // Diamond: d depends on b and c, both depend on a
        let jobs = vec![
            job(1, "a", &[]),
            job(2, "b", &[1]),
            job(3, "c", &[1]),
            job(4, "d", &[2, 3]),
        ];

        assert!(resolver.detect_cycles(&jobs).is_empty());
    }

    #[test]
    fn test_cycle_path_starts_at_traversal_root() {
        let resolver = DependencyResolver::new();
        let jobs = vec![job(1, "root", &[2]), job(2, "x", &[3]), job(3, "y", &[2])];

        assert_eq!(resolver.detect_cycles(&jobs), vec!["root -> x -> y -> x".to_string()]);
    }

    #[test]
    fn test_self_reference_and_unpersisted_jobs() {
        let resolver = DependencyResolver::new();
        let mut unsaved = job(9, "unsaved", &[1]);
        unsaved.id = None;
        let jobs = vec![job(1, "loop", &[1]), unsaved];

        assert_eq!(resolver.detect_cycles(&jobs), vec!["loop -> loop".to_string()]);
    }

    #[test]
    fn test_independent_cycles_are_each_reported() {
        let resolver = DependencyResolver::new();
        let jobs = vec![
            job(1, "a", &[2]),
            job(2, "b", &[1]),
            job(3, "c", &[4]),
            job(4, "d", &[3]),
        ];

        assert_eq!(resolver.detect_cycles(&jobs).len(), 2);
    }

    #[test]
    fn test_reverse_dependents() {
        let resolver = DependencyResolver::new();
        let jobs = vec![job(1, "a", &[]), job(2, "b", &[1]), job(3, "c", &[1, 2])];

        let dependents: Vec<_> = resolver
            .reverse_dependents(&jobs[0], &jobs)
            .into_iter()
            .map(|j| j.command.as_str())
            .collect();
        assert_eq!(dependents, vec!["b", "c"]);
        assert!(resolver.reverse_dependents(&jobs[2], &jobs).is_empty());
    }
}
