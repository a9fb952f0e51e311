//! Worker process spawning and polling.
//!
//! The orchestrator never blocks on a child. It starts workers through a
//! [`ProcessSpawner`] and later asks each handle for its [`ProcessState`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use cronman_core::JobId;
use tokio::process::{Child, Command};
use tracing::{error, warn};

/// Observed state of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Still running
    Running,
    /// Exited; `None` when terminated by a signal or the status was lost
    Exited(Option<i32>),
    /// Timeout exceeded and kill requested, exit not yet observed
    TimedOut,
}

impl ProcessState {
    /// Whether the process is known to have exited.
    pub fn has_exited(&self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

/// Handle on a started worker.
pub trait WorkerProcess: Send {
    /// Non-blocking status check.
    fn poll(&mut self) -> ProcessState;
}

/// Starts worker processes bound to a job.
pub trait ProcessSpawner: Send + Sync {
    /// Start a worker for `job_id` without waiting for it.
    fn spawn(&self, job_id: JobId) -> std::io::Result<Box<dyn WorkerProcess>>;
}

/// Spawns `<program> <args...> process <job id>` as an OS process.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandSpawner {
    /// Create a spawner for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Arguments placed before the `process` subcommand.
    pub fn with_args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill workers running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Full argument vector for a job.
    pub fn invocation(&self, job_id: JobId) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push("process".to_string());
        argv.push(job_id.to_string());
        argv
    }
}

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self, job_id: JobId) -> std::io::Result<Box<dyn WorkerProcess>> {
        let mut command = Command::new(&self.program);
        command
            .args(self.invocation(job_id))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // The job's command runs as a grandchild; a group lets a kill reach it
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;

        Ok(Box::new(ChildProcess::new(child, self.timeout)))
    }
}

/// A spawned OS process with an optional deadline.
pub struct ChildProcess {
    child: Child,
    started: Instant,
    timeout: Option<Duration>,
    kill_sent: bool,
}

impl ChildProcess {
    /// Wrap a running child.
    pub fn new(child: Child, timeout: Option<Duration>) -> Self {
        Self {
            child,
            started: Instant::now(),
            timeout,
            kill_sent: false,
        }
    }
}

impl ChildProcess {
    /// SIGKILL the worker together with everything it started. Falls back
    /// to killing the child alone when it does not lead a process group.
    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => return,
                Err(e) => warn!(pid, "failed to kill worker process group: {}", e),
            }
        }

        if let Err(e) = self.child.start_kill() {
            warn!("failed to kill worker: {}", e);
        }
    }
}

impl WorkerProcess for ChildProcess {
    fn poll(&mut self) -> ProcessState {
        match self.child.try_wait() {
            Ok(Some(status)) => ProcessState::Exited(status.code()),
            Ok(None) => match self.timeout {
                Some(limit) if self.started.elapsed() > limit => {
                    if !self.kill_sent {
                        warn!(pid = ?self.child.id(), "worker exceeded timeout of {:?}, killing", limit);
                        self.kill();
                        self.kill_sent = true;
                    }
                    ProcessState::TimedOut
                }
                _ => ProcessState::Running,
            },
            Err(e) => {
                error!("lost track of worker process: {}", e);
                ProcessState::Exited(None)
            }
        }
    }
}
