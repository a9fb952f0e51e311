//! Identifiers for cronman entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of a persisted job.
///
/// Numeric and assigned by the storage backend on first save, so a job
/// that has never been persisted carries no id at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Wrap a raw storage id.
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub fn get(self) -> i64 {
        self.0
    }

    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Unique identifier for a RunResult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunResultId(Ulid);

impl RunResultId {
    /// Generate a new RunResultId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunResultId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
