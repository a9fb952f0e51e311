//! Per-pass occurrence counting.

use std::collections::HashMap;

/// Counts how often each command has been declared during one pass.
///
/// The n-th definition of a command binds to the persisted job with
/// instance number n. Never persisted.
#[derive(Debug, Default, Clone)]
pub struct JobCounter {
    counts: HashMap<String, u32>,
}

impl JobCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more occurrence of `command`, returning its number.
    pub fn increase(&mut self, command: &str) -> u32 {
        let count = self.counts.entry(command.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Occurrences of `command` so far; 0 if never seen.
    pub fn value(&self, command: &str) -> u32 {
        self.counts.get(command).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_command() {
        let mut counter = JobCounter::new();
        assert_eq!(counter.value("app:a"), 0);

        assert_eq!(counter.increase("app:a"), 1);
        assert_eq!(counter.increase("app:b"), 1);
        assert_eq!(counter.increase("app:a"), 2);

        assert_eq!(counter.value("app:a"), 2);
        assert_eq!(counter.value("app:b"), 1);
    }
}
