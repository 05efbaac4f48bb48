//! Committer interface
//!
//! A committer is the downstream sink (search index, database, file) that
//! receives accepted documents. The commit queue is its only caller, and it
//! never has more than one batch in flight at a time.

use crate::committer::{CommitterRequest, DeleteRequest, UpsertRequest};
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a committer
#[derive(Debug, Error)]
pub enum CommitterError {
    #[error("Committer initialization failed: {0}")]
    Init(String),

    #[error("Committer rejected {reference}: {message}")]
    Rejected { reference: String, message: String },

    #[error("Committer unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for committer operations
pub type CommitterResult<T> = Result<T, CommitterError>;

/// Downstream sink for committed documents
///
/// `upsert` and `delete` must be idempotent: after a crash the queue may
/// deliver the same batch again.
#[async_trait]
pub trait Committer: Send {
    /// Prepares the sink before the first batch
    async fn init(&mut self) -> CommitterResult<()>;

    /// Adds or replaces a document
    async fn upsert(&mut self, request: &UpsertRequest) -> CommitterResult<()>;

    /// Removes a document
    async fn delete(&mut self, request: &DeleteRequest) -> CommitterResult<()>;

    /// Finalizes the sink once every batch has been delivered
    async fn close(&mut self) -> CommitterResult<()>;

    /// Resets all sink-side state
    async fn clean(&mut self) -> CommitterResult<()>;

    /// Delivers one batch in order
    ///
    /// Sinks with a native bulk API can override this. The batch counts as
    /// delivered only if this returns `Ok`.
    async fn commit_batch(&mut self, requests: &[CommitterRequest]) -> CommitterResult<()> {
        for request in requests {
            match request {
                CommitterRequest::Upsert(upsert) => self.upsert(upsert).await?,
                CommitterRequest::Delete(delete) => self.delete(delete).await?,
            }
        }
        Ok(())
    }
}
