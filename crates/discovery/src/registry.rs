//! Symbolic reference resolution.

use std::collections::HashMap;

use tracing::warn;

/// Maps symbolic references to command names.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    references: HashMap<String, String>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `reference` as a name for `command`.
    ///
    /// Re-registering a reference for a different command replaces it.
    pub fn register(&mut self, reference: impl Into<String>, command: impl Into<String>) {
        let reference = reference.into();
        let command = command.into();
        if let Some(previous) = self.references.get(&reference) {
            if *previous != command {
                warn!(reference = %reference, "reference now resolves to `{}` instead of `{}`", command, previous);
            }
        }
        self.references.insert(reference, command);
    }

    /// Command name behind `reference`.
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        self.references.get(reference).map(String::as_str)
    }

    /// Resolve every reference, silently dropping unknown ones.
    pub fn resolve_all<S: AsRef<str>>(&self, references: &[S]) -> Vec<String> {
        references
            .iter()
            .filter_map(|r| self.resolve(r.as_ref()))
            .map(str::to_string)
            .collect()
    }

    /// Number of registered references.
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Forget every reference.
    pub fn clear(&mut self) {
        self.references.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let mut registry = CommandRegistry::new();
        registry.register("import", "app:import");

        assert_eq!(registry.resolve("import"), Some("app:import"));
        assert_eq!(registry.resolve("export"), None);
    }

    #[test]
    fn test_resolve_all_drops_unknown() {
        let mut registry = CommandRegistry::new();
        registry.register("import", "app:import");
        registry.register("report", "app:report");

        let resolved = registry.resolve_all(&["report", "missing", "import"]);
        assert_eq!(resolved, vec!["app:report", "app:import"]);
    }

    #[test]
    fn test_clear() {
        let mut registry = CommandRegistry::new();
        registry.register("import", "app:import");
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.resolve("import"), None);
    }
}
