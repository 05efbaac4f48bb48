//! SQLite checksum store
//!
//! This module provides a SQLite-based implementation of the ChecksumStore trait.

use crate::checksum::schema::initialize_schema;
use crate::checksum::store::{ChecksumStore, StoreError, StoreResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite checksum store backend
///
/// The connection sits behind a mutex so one store can be shared by every
/// pipeline worker and by the queue's flush path.
pub struct SqliteChecksumStore {
    conn: Mutex<Connection>,
}

impl SqliteChecksumStore {
    /// Opens or creates the checksum database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteChecksumStore)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        tracing::debug!("Opened checksum store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ChecksumStore for SqliteChecksumStore {
    fn get(&self, reference: &str) -> StoreResult<Option<String>> {
        let signature = self
            .conn()?
            .query_row(
                "SELECT signature FROM checksums WHERE reference = ?1",
                params![reference],
                |row| row.get(0),
            )
            .optional()?;
        Ok(signature)
    }

    fn put(&self, reference: &str, signature: &str) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO checksums (reference, signature, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(reference) DO UPDATE SET signature = excluded.signature,
             updated_at = excluded.updated_at",
            params![reference, signature, now],
        )?;
        Ok(())
    }

    fn remove(&self, reference: &str) -> StoreResult<()> {
        self.conn()?.execute(
            "DELETE FROM checksums WHERE reference = ?1",
            params![reference],
        )?;
        Ok(())
    }

    fn count(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM checksums", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn clear(&self) -> StoreResult<()> {
        self.conn()?.execute("DELETE FROM checksums", [])?;
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.conn()?
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
