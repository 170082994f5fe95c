//! Storage backends for the Hestia automation hub.
//!
//! This crate provides the byte-level key-value abstraction the hub core
//! persists through. Keys are grouped into named tables and may use `/`
//! separators to form hierarchical paths; the interpretation of paths is
//! left to the caller.
//!
//! Two backends are provided:
//! - [`RedbBackend`]: persistent single-file storage using redb.
//! - [`MemoryBackend`]: in-memory storage for tests and throwaway hubs.

pub mod backends;
pub mod error;

pub use backends::{MemoryBackend, StorageBackend};
pub use backends::redb::{RedbBackend, RedbBackendConfig};
pub use error::{Error, Result};
