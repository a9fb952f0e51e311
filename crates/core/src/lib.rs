//! cronman core data models.
//!
//! Jobs, their run results and the declared definitions they are
//! reconciled from, plus cron expression evaluation.

#![warn(missing_docs)]

mod id;
mod job;
mod result;
mod definition;

pub mod error;
pub mod schedule;

pub use id::{JobId, RunResultId};
pub use job::{Job, JobFilter, DependencyMode, DependencyFailureMode};
pub use result::RunResult;
pub use definition::JobDefinition;
pub use error::{CoreError, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
