//! Checksum module for change detection between crawls
//!
//! This module handles:
//! - Computing document signatures from metadata fields or content
//! - Classifying documents as new, modified or unmodified
//! - Persisting the last committed signature per reference (SQLite or memory)

mod engine;
mod schema;
mod sqlite;
mod store;

pub use engine::{classify, ChangeClass, Checksummer, DEFAULT_FIELD};
pub use sqlite::SqliteChecksumStore;
pub use store::{ChecksumStore, MemoryChecksumStore, StoreError, StoreResult};

use std::path::Path;
use std::sync::Arc;

/// Opens the configured checksum store
///
/// # Arguments
///
/// * `path` - Path to the SQLite database, or `None` for an in-memory store
pub fn open_store(path: Option<&Path>) -> StoreResult<Arc<dyn ChecksumStore>> {
    Ok(match path {
        Some(path) => Arc::new(SqliteChecksumStore::open(path)?),
        None => Arc::new(MemoryChecksumStore::new()),
    })
}
