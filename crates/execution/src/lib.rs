//! Execution layer - dependency resolution, process supervision and the
//! run orchestrator.

#![warn(missing_docs)]

pub mod dependency;
pub mod engine;
pub mod error;
pub mod process;
pub mod worker;

pub use dependency::{DependencyResolver, Resolution};
pub use engine::{Completion, EngineConfig, ExecutionEngine, InFlight, JobOutcome, JobReport, TickReport};
pub use error::{ExecutionError, Result};
pub use process::{ChildProcess, CommandSpawner, ProcessSpawner, ProcessState, WorkerProcess};
pub use worker::JobRunner;
