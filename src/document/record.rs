//! Document records
//!
//! A `DocumentRecord` is owned by exactly one worker for the duration of its
//! pipeline run.

use crate::document::{DocState, Metadata};
use crate::StageError;
use std::borrow::Cow;
use std::path::PathBuf;

/// Which parts of a document are available to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPhase {
    /// Only metadata (e.g. HTTP headers) has been fetched
    Metadata,

    /// Metadata and content are both available
    Document,
}

/// Document content, either held in memory or spooled to a file by the fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl Content {
    /// Reads the whole content
    ///
    /// In-memory content is borrowed; file content is read from disk.
    pub fn read(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match self {
            Self::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            Self::File(path) => std::fs::read(path).map(Cow::Owned),
        }
    }

    /// Async counterpart of [`Content::read`]
    pub async fn read_async(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::File(path) => tokio::fs::read(path).await,
        }
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Bytes(text.as_bytes().to_vec())
    }
}

/// A fetched document and everything the pipeline learns about it
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Stable unique identifier (usually the URL)
    pub reference: String,

    /// Document fields
    pub metadata: Metadata,

    /// Document content, absent for metadata-only fetches
    pub content: Option<Content>,

    /// Signature stored by a previous crawl, if any
    pub prior_checksum: Option<String>,

    /// Signature computed during this run, if any
    pub new_checksum: Option<String>,

    state: Option<DocState>,
}

impl DocumentRecord {
    /// Creates a record with no metadata, no content and no state
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            metadata: Metadata::new(),
            content: None,
            prior_checksum: None,
            new_checksum: None,
            state: None,
        }
    }

    /// Creates a record for a document that disappeared upstream
    ///
    /// Deleted records bypass every stage and always produce a delete request.
    pub fn deleted(reference: impl Into<String>, metadata: Metadata) -> Self {
        let mut record = Self::new(reference).with_metadata(metadata);
        record.state = Some(DocState::Deleted);
        record
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_content(mut self, content: impl Into<Content>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Current state, `None` until a stage decides one
    pub fn state(&self) -> Option<DocState> {
        self.state
    }

    /// Moves the record to a new state
    ///
    /// Once a record is rejected or errored it stays that way for the rest
    /// of the run.
    pub fn set_state(&mut self, state: DocState) -> Result<(), StageError> {
        match self.state {
            Some(current) if current.is_rejecting() && current != state => {
                Err(StageError::InvalidTransition {
                    from: current,
                    to: state,
                })
            }
            _ => {
                self.state = Some(state);
                Ok(())
            }
        }
    }

    /// Marks the record as failed, regardless of any accepting state set earlier
    pub(crate) fn mark_error(&mut self) {
        if self.state != Some(DocState::Rejected) {
            self.state = Some(DocState::Error);
        }
    }

    /// Clears the per-run state so the record can be evaluated again
    pub fn reset(&mut self) {
        if self.state != Some(DocState::Deleted) {
            self.state = None;
        }
        self.prior_checksum = None;
        self.new_checksum = None;
    }

    /// Reads the content, mapping failures to a stage error
    pub fn read_content(&self) -> Result<Option<Cow<'_, [u8]>>, StageError> {
        match &self.content {
            None => Ok(None),
            Some(content) => content
                .read()
                .map(Some)
                .map_err(|source| StageError::UnreadableContent {
                    reference: self.reference.clone(),
                    source,
                }),
        }
    }
}
