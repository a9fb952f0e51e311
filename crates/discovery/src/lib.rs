//! Job discovery.
//!
//! Keeps the persisted job set in sync with the declared definitions:
//! a [`JobCatalog`] enumerates definitions, a [`CommandRegistry`] resolves
//! symbolic dependency references and the [`Reconciler`] merges both into
//! storage.

#![warn(missing_docs)]

mod counter;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod source;

pub use counter::JobCounter;
pub use error::{DiscoveryError, Result};
pub use reconciler::{DependencyEdge, FailedDefinition, Reconciler, ScanOptions, ScanReport, UnresolvedReference};
pub use registry::CommandRegistry;
pub use source::{DefinitionSource, JobCatalog};
