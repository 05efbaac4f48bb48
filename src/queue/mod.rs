//! Durable commit queue
//!
//! This module handles:
//! - Staging every submitted request to disk before the submit call returns
//! - Grouping requests into numbered batches under numbered folders
//! - Flushing closed batches to the committer strictly in creation order
//! - Recovering batches left on disk by a previous session

mod commit_queue;
mod flusher;
mod layout;
mod staged;

pub use commit_queue::{CommitQueue, QueueStats, RecoveryReport};
pub use flusher::Flusher;
pub use layout::{scan_staging, ScannedBatch, StagingScan};
pub use staged::{BatchManifest, StagedContent, StagedOperation, StagedRequest};

use crate::committer::CommitterError;
use crate::config::QueueSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while staging or flushing requests
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Staging IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize staged data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt staged data at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Queue has not been recovered yet")]
    NotRecovered,

    #[error("Flushing is halted: {0}")]
    FlushHalted(String),

    #[error("Batch {batch_id} failed after {attempts} attempts: {source}")]
    CommitterFlush {
        batch_id: u64,
        attempts: u32,
        #[source]
        source: CommitterError,
    },

    #[error("Committer error: {0}")]
    Committer(#[from] CommitterError),

    #[error("Queue state lock poisoned")]
    LockPoisoned,

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Builds a closure that attaches a path to an IO error
pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> QueueError + '_ {
    move |source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Runtime queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Root of the staging area
    pub directory: PathBuf,

    /// Requests per batch
    pub batch_size: usize,

    /// Batches per folder
    pub max_per_folder: usize,

    /// Closed but unflushed batches allowed before submitters block
    pub max_pending_batches: usize,

    /// How often the background flusher force-closes a partial batch
    pub flush_interval: Duration,

    /// Retries after the first failed delivery of a batch
    pub max_retries: u32,

    /// Delay before the first retry, doubled after each failure
    pub retry_delay: Duration,

    /// Upper bound for the retry delay
    pub max_retry_delay: Duration,

    /// Content up to this many bytes is stored inside the request file
    pub inline_content_limit: usize,
}

impl QueueConfig {
    /// Creates a configuration with default limits for a staging directory
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            batch_size: 100,
            max_per_folder: 500,
            max_pending_batches: 64,
            flush_interval: Duration::from_millis(5000),
            max_retries: 5,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_millis(30_000),
            inline_content_limit: 4096,
        }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            directory: PathBuf::from(&settings.directory),
            batch_size: settings.batch_size,
            max_per_folder: settings.max_per_folder,
            max_pending_batches: settings.max_pending_batches,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            max_retry_delay: Duration::from_millis(settings.max_retry_delay_ms),
            inline_content_limit: settings.inline_content_limit,
        }
    }
}
