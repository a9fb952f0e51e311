//! Declared job definitions.
//!
//! A definition is what an operator declares; a [`Job`](crate::Job) is what
//! gets persisted. Definitions are rebuilt on every discovery pass.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::job::{DependencyFailureMode, DependencyMode};
use crate::schedule;

/// Intended configuration of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Symbolic reference other definitions use in `depends_on`;
    /// defaults to the command
    #[serde(default)]
    pub key: Option<String>,

    /// Command to execute
    pub command: String,

    /// Schedule expression
    pub schedule: String,

    /// Extra arguments
    #[serde(default)]
    pub arguments: Option<String>,

    /// Description
    #[serde(default)]
    pub description: Option<String>,

    /// Concurrency ceiling
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    /// Selection tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Symbolic references of the jobs this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Dependency combinator
    #[serde(default)]
    pub dependency_mode: DependencyMode,

    /// Failure policy
    #[serde(default)]
    pub on_dependency_failure: DependencyFailureMode,
}

fn default_max_instances() -> u32 {
    1
}

impl JobDefinition {
    /// Minimal definition; everything else takes its default.
    pub fn new(command: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            key: None,
            command: command.into(),
            schedule: schedule.into(),
            arguments: None,
            description: None,
            max_instances: default_max_instances(),
            tags: Vec::new(),
            depends_on: Vec::new(),
            dependency_mode: DependencyMode::default(),
            on_dependency_failure: DependencyFailureMode::default(),
        }
    }

    /// Set the symbolic reference.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set arguments.
    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the concurrency ceiling.
    pub fn with_max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    /// Set tags.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Declare a dependency on another definition's reference.
    pub fn depends_on(mut self, reference: impl Into<String>) -> Self {
        self.depends_on.push(reference.into());
        self
    }

    /// Set the dependency combinator.
    pub fn with_dependency_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = mode;
        self
    }

    /// Set the failure policy.
    pub fn with_on_dependency_failure(mut self, mode: DependencyFailureMode) -> Self {
        self.on_dependency_failure = mode;
        self
    }

    /// Symbolic reference of this definition.
    pub fn reference(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.command)
    }

    /// Expression with escape backslashes removed.
    pub fn expression(&self) -> String {
        self.schedule.replace('\\', "")
    }

    /// Reject definitions that cannot be materialised.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(CoreError::InvalidDefinition {
                command: self.command.clone(),
                reason: "command has to be provided".to_string(),
            });
        }
        if self.max_instances == 0 {
            return Err(CoreError::InvalidDefinition {
                command: self.command.clone(),
                reason: "max_instances must be at least 1".to_string(),
            });
        }
        schedule::validate(&self.schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_defaults_to_command() {
        let def = JobDefinition::new("app:cleanup", "@daily");
        assert_eq!(def.reference(), "app:cleanup");

        let def = def.with_key("cleanup");
        assert_eq!(def.reference(), "cleanup");
    }

    #[test]
    fn test_validate() {
        assert!(JobDefinition::new("app:cleanup", "@daily").validate().is_ok());
        assert!(JobDefinition::new("  ", "@daily").validate().is_err());
        assert!(JobDefinition::new("app:cleanup", "@daily")
            .with_max_instances(0)
            .validate()
            .is_err());
        assert!(matches!(
            JobDefinition::new("app:cleanup", "whenever").validate(),
            Err(CoreError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_escaped_expression() {
        let def = JobDefinition::new("app:cleanup", "*\\/5 * * * *");
        assert_eq!(def.expression(), "*/5 * * * *");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let def: JobDefinition = serde_json::from_str(
            r#"{"command": "app:report", "schedule": "@hourly", "depends_on": ["import"], "dependency_mode": "or"}"#,
        )
        .unwrap();

        assert_eq!(def.max_instances, 1);
        assert_eq!(def.depends_on, vec!["import".to_string()]);
        assert_eq!(def.dependency_mode, DependencyMode::Or);
        assert_eq!(def.on_dependency_failure, DependencyFailureMode::Skip);
    }
}
