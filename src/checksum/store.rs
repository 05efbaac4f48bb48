//! Checksum store trait and error types
//!
//! This module defines the trait interface for signature stores and an
//! in-memory implementation used for tests and throwaway sessions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors that can occur during checksum store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum store lock poisoned")]
    Poisoned,
}

/// Result type for checksum store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable mapping from document reference to its last committed signature
///
/// Implementations must be safe to share between workers. Each call only
/// needs to be atomic on its own; callers guarantee that a given reference
/// is never evaluated by two workers at once.
pub trait ChecksumStore: Send + Sync {
    /// Gets the stored signature for a reference
    fn get(&self, reference: &str) -> StoreResult<Option<String>>;

    /// Stores a signature, replacing any previous one
    fn put(&self, reference: &str, signature: &str) -> StoreResult<()>;

    /// Forgets a reference
    fn remove(&self, reference: &str) -> StoreResult<()>;

    /// Number of stored signatures
    fn count(&self) -> StoreResult<u64>;

    /// Removes every stored signature
    fn clear(&self) -> StoreResult<()>;

    /// Makes pending writes durable; called at session end
    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Checksum store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryChecksumStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> StoreResult<MutexGuard<'_, HashMap<String, String>>> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ChecksumStore for MemoryChecksumStore {
    fn get(&self, reference: &str) -> StoreResult<Option<String>> {
        Ok(self.entries()?.get(reference).cloned())
    }

    fn put(&self, reference: &str, signature: &str) -> StoreResult<()> {
        self.entries()?
            .insert(reference.to_string(), signature.to_string());
        Ok(())
    }

    fn remove(&self, reference: &str) -> StoreResult<()> {
        self.entries()?.remove(reference);
        Ok(())
    }

    fn count(&self) -> StoreResult<u64> {
        Ok(self.entries()?.len() as u64)
    }

    fn clear(&self) -> StoreResult<()> {
        self.entries()?.clear();
        Ok(())
    }
}
