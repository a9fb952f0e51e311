//! Discovery errors.

use cronman_core::CoreError;
use cronman_storage::StorageError;

/// Result alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that abort a discovery pass.
///
/// Problems with a single definition do not abort the pass; they are
/// collected in the scan report instead.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid job configuration
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Definition file could not be read
    #[error("failed to read definitions: {0}")]
    Io(#[from] std::io::Error),

    /// Definition file could not be parsed
    #[error("failed to parse definitions: {0}")]
    Parse(#[from] toml::de::Error),
}
