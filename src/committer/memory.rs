//! In-memory committer
//!
//! Keeps every request it receives. Used by tests and by dry runs where no
//! real sink is configured. Clones share the same recorded state, so a test
//! can hand one clone to the queue and inspect another.

use crate::committer::{
    Committer, CommitterRequest, CommitterResult, DeleteRequest, UpsertRequest,
};
use crate::document::Content;
use crate::filter::TextMatcher;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    requests: Vec<CommitterRequest>,
    upserts: usize,
    deletes: usize,
    initialized: bool,
    closed: bool,
}

/// Committer that records requests in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCommitter {
    state: Arc<Mutex<MemoryState>>,
    field_matcher: Option<TextMatcher>,
    ignore_content: bool,
}

impl MemoryCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only metadata fields whose name matches
    pub fn with_field_matcher(mut self, matcher: TextMatcher) -> Self {
        self.field_matcher = Some(matcher);
        self
    }

    /// Drops content from recorded upserts
    pub fn with_ignore_content(mut self, ignore: bool) -> Self {
        self.ignore_content = ignore;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the recorded requests.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All recorded requests in delivery order
    pub fn requests(&self) -> Vec<CommitterRequest> {
        self.lock().requests.clone()
    }

    pub fn upsert_requests(&self) -> Vec<UpsertRequest> {
        self.lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                CommitterRequest::Upsert(u) => Some(u.clone()),
                CommitterRequest::Delete(_) => None,
            })
            .collect()
    }

    pub fn delete_requests(&self) -> Vec<DeleteRequest> {
        self.lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                CommitterRequest::Delete(d) => Some(d.clone()),
                CommitterRequest::Upsert(_) => None,
            })
            .collect()
    }

    /// References in delivery order
    pub fn references(&self) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .map(|r| r.reference().to_string())
            .collect()
    }

    pub fn upsert_count(&self) -> usize {
        self.lock().upserts
    }

    pub fn delete_count(&self) -> usize {
        self.lock().deletes
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn filter_metadata(&self, metadata: &mut crate::document::Metadata) {
        if let Some(matcher) = &self.field_matcher {
            metadata.retain_fields(|name| matcher.matches(name));
        }
    }
}

#[async_trait]
impl Committer for MemoryCommitter {
    async fn init(&mut self) -> CommitterResult<()> {
        let mut state = self.lock();
        state.initialized = true;
        state.closed = false;
        Ok(())
    }

    async fn upsert(&mut self, request: &UpsertRequest) -> CommitterResult<()> {
        let mut metadata = request.metadata.clone();
        self.filter_metadata(&mut metadata);

        let content = match (&request.content, self.ignore_content) {
            (Some(content), false) => Some(Content::Bytes(content.read_async().await?)),
            _ => None,
        };

        tracing::debug!("Memory committer upsert: {}", request.reference);
        let mut state = self.lock();
        state.requests.push(CommitterRequest::upsert(
            request.reference.clone(),
            metadata,
            content,
        ));
        state.upserts += 1;
        Ok(())
    }

    async fn delete(&mut self, request: &DeleteRequest) -> CommitterResult<()> {
        let mut metadata = request.metadata.clone();
        self.filter_metadata(&mut metadata);

        tracing::debug!("Memory committer delete: {}", request.reference);
        let mut state = self.lock();
        state
            .requests
            .push(CommitterRequest::delete(request.reference.clone(), metadata));
        state.deletes += 1;
        Ok(())
    }

    async fn close(&mut self) -> CommitterResult<()> {
        let mut state = self.lock();
        state.closed = true;
        tracing::info!(
            "Memory committer closed: {} upserts, {} deletes",
            state.upserts,
            state.deletes
        );
        Ok(())
    }

    async fn clean(&mut self) -> CommitterResult<()> {
        let mut state = self.lock();
        state.requests.clear();
        state.upserts = 0;
        state.deletes = 0;
        Ok(())
    }
}
