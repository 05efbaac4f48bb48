//! Sumi-Sift: document evaluation and durable commit staging for crawlers
//!
//! This crate decides what happens to every fetched document (rejected by a
//! filter, unchanged since the last crawl, new or modified) and delivers the
//! accepted ones to a downstream committer through a durable, batched,
//! crash-recoverable queue.

pub mod checksum;
pub mod committer;
pub mod config;
pub mod crawler;
pub mod document;
pub mod filter;
pub mod output;
pub mod pipeline;
pub mod queue;

use thiserror::Error;

/// Main error type for Sumi-Sift operations
#[derive(Debug, Error)]
pub enum SiftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Committer error: {0}")]
    Committer(#[from] committer::CommitterError),

    #[error("Checksum store error: {0}")]
    Store(#[from] checksum::StoreError),

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
///
/// These only ever surface while loading configuration, never while a
/// document is being evaluated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Per-document evaluation errors
///
/// A stage error moves the document to [`DocState::Error`] and ends its
/// pipeline run. It never affects other documents.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Content of {reference} could not be read: {source}")]
    UnreadableContent {
        reference: String,
        source: std::io::Error,
    },

    #[error("Content of {reference} is required but missing")]
    MissingContent { reference: String },

    #[error("Malformed field '{field}' on {reference}: {message}")]
    MalformedField {
        reference: String,
        field: String,
        message: String,
    },

    #[error("Checksum lookup failed for {reference}: {source}")]
    Store {
        reference: String,
        source: checksum::StoreError,
    },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: DocState, to: DocState },
}

/// Result type alias for Sumi-Sift operations
pub type Result<T> = std::result::Result<T, SiftError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for stage operations
pub type StageResult<T> = std::result::Result<T, StageError>;

// Re-export commonly used types
pub use committer::{Committer, CommitterRequest, MemoryCommitter};
pub use config::Config;
pub use document::{Content, DocState, DocumentRecord, FetchPhase, Metadata};
pub use pipeline::Pipeline;
pub use queue::{CommitQueue, QueueConfig};
