//! `cronman.toml` loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cronman_discovery::JobCatalog;
use serde::Deserialize;
use tracing::debug;

/// Default configuration file name.
pub const DEFAULT_CONFIG: &str = "cronman.toml";

/// The `[settings]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Storage directory
    pub store: PathBuf,
    /// Kill workers running longer than this many seconds
    pub timeout_secs: Option<f64>,
    /// Prune run results older than this many hours before each tick
    pub result_retention_hours: Option<u32>,
    /// Delay between supervision sweeps
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: PathBuf::from(".cronman"),
            timeout_secs: None,
            result_retention_hours: None,
            poll_interval_ms: 1000,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    settings: Settings,
}

/// Settings plus the declared job catalog.
#[derive(Debug, Default)]
pub struct Config {
    /// File the configuration came from; `None` when running on defaults
    pub path: Option<PathBuf>,
    pub settings: Settings,
    pub catalog: JobCatalog,
}

impl Config {
    /// Parse a configuration document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: SettingsFile = toml::from_str(content).context("invalid [settings] table")?;
        let catalog = JobCatalog::from_toml_str(content).context("invalid [[job]] table")?;
        Ok(Self {
            path: None,
            settings: file.settings,
            catalog,
        })
    }

    /// Load `path`. A missing file is only tolerated when `required` is
    /// false, in which case defaults are used.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() && !required {
            debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("failed to load {}", path.display()))?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }
}
