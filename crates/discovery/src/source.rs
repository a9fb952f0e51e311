//! Definition sources.

use std::path::Path;

use cronman_core::JobDefinition;
use serde::Deserialize;

use crate::error::Result;
use crate::registry::CommandRegistry;

/// A replayable sequence of job definitions.
///
/// The reconciler enumerates the source twice per pass and relies on both
/// enumerations yielding the same order.
pub trait DefinitionSource {
    /// Definitions in declaration order.
    fn definitions(&self) -> Vec<JobDefinition>;
}

impl DefinitionSource for Vec<JobDefinition> {
    fn definitions(&self) -> Vec<JobDefinition> {
        self.clone()
    }
}

/// Explicit registration list of job definitions.
#[derive(Debug, Default, Clone)]
pub struct JobCatalog {
    definitions: Vec<JobDefinition>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "job")]
    jobs: Vec<JobDefinition>,
}

impl JobCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `[[job]]` tables of a TOML document. Other tables are
    /// ignored.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        Ok(Self { definitions: file.jobs })
    }

    /// Load a catalog from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Append a definition.
    pub fn register(&mut self, definition: JobDefinition) -> &mut Self {
        self.definitions.push(definition);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, definition: JobDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Registry resolving every command name and every explicit key to its
    /// command.
    pub fn registry(&self) -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        for definition in &self.definitions {
            registry.register(definition.command.clone(), definition.command.clone());
        }
        for definition in &self.definitions {
            if let Some(key) = &definition.key {
                registry.register(key.clone(), definition.command.clone());
            }
        }
        registry
    }
}

impl From<Vec<JobDefinition>> for JobCatalog {
    fn from(definitions: Vec<JobDefinition>) -> Self {
        Self { definitions }
    }
}

impl DefinitionSource for JobCatalog {
    fn definitions(&self) -> Vec<JobDefinition> {
        self.definitions.clone()
    }
}
