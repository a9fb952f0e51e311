//! Storage abstraction and implementations for cronman.
//!
//! This crate provides a trait-based storage interface with a JSON file
//! reference implementation, an in-memory backend and an optional SQLite
//! backend.

#![warn(missing_docs)]

pub mod trait_;
#[cfg(feature = "json")]
pub mod json_storage;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{Storage, StorageError, Result};
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;
pub use memory::MemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
