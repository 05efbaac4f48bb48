//! Document coordinator
//!
//! Runs the pipeline for fetched documents on a pool of workers and hands
//! accepted and deleted documents to the commit queue. Two workers never
//! evaluate the same reference at the same time.

use crate::committer::CommitterRequest;
use crate::document::{DocState, DocumentRecord, FetchPhase};
use crate::pipeline::Pipeline;
use crate::queue::CommitQueue;
use crate::SiftError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;

/// Set of references currently being evaluated
#[derive(Debug, Default)]
pub struct ReferenceLocks {
    active: Mutex<HashSet<String>>,
    released: Notify,
}

/// Exclusive hold on one reference, released on drop
pub struct ReferenceGuard {
    locks: Arc<ReferenceLocks>,
    reference: String,
}

impl ReferenceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits until no one else holds the reference, then takes it
    pub async fn acquire(self: &Arc<Self>, reference: &str) -> ReferenceGuard {
        loop {
            let released = self.released.notified();
            if self.active().insert(reference.to_string()) {
                return ReferenceGuard {
                    locks: Arc::clone(self),
                    reference: reference.to_string(),
                };
            }
            tracing::debug!("Waiting for {} to be released", reference);
            released.await;
        }
    }

    pub fn is_held(&self, reference: &str) -> bool {
        self.active().contains(reference)
    }
}

impl Drop for ReferenceGuard {
    fn drop(&mut self) {
        self.locks.active().remove(&self.reference);
        self.locks.released.notify_waiters();
    }
}

/// Routes documents through the pipeline and into the commit queue
pub struct Coordinator {
    pipeline: Arc<Pipeline>,
    queue: CommitQueue,
    locks: Arc<ReferenceLocks>,
    counts: Mutex<HashMap<DocState, u64>>,
}

impl Coordinator {
    /// Creates a coordinator
    ///
    /// # Arguments
    ///
    /// * `pipeline` - The evaluation pipeline
    /// * `queue` - A recovered commit queue
    pub fn new(pipeline: Pipeline, queue: CommitQueue) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            queue,
            locks: Arc::new(ReferenceLocks::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &CommitQueue {
        &self.queue
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Evaluates a fully fetched document and stages the resulting request
    ///
    /// Per-document failures come back as [`DocState::Error`]. Only staging
    /// failures are returned as errors, since the document was evaluated but
    /// not handed off.
    ///
    /// # Returns
    ///
    /// * `Ok(DocState)` - The document's final state
    /// * `Err(SiftError)` - The request could not be staged
    pub async fn process(&self, mut record: DocumentRecord) -> Result<DocState, SiftError> {
        let _guard = self.locks.acquire(&record.reference).await;
        record.reset();

        let pipeline = Arc::clone(&self.pipeline);
        let (record, state) = tokio::task::spawn_blocking(move || {
            let state = pipeline.evaluate(&mut record, FetchPhase::Document);
            (record, state)
        })
        .await
        .map_err(|e| SiftError::Task(e.to_string()))?;

        self.count(state);
        match state {
            DocState::New | DocState::Modified => {
                let request =
                    CommitterRequest::upsert(record.reference, record.metadata, record.content);
                self.queue
                    .submit_with_signature(request, record.new_checksum)
                    .await?;
            }
            DocState::Deleted => {
                let request = CommitterRequest::delete(record.reference, record.metadata);
                self.queue.submit(request).await?;
            }
            DocState::Unmodified | DocState::Rejected | DocState::Error => {
                tracing::debug!("{} not committed ({})", record.reference, state);
            }
        }

        Ok(state)
    }

    /// Evaluates a document from its metadata alone
    ///
    /// Lets a fetcher skip downloading content for documents that are
    /// rejected or unchanged. Nothing is staged.
    pub async fn precheck(&self, record: &mut DocumentRecord) -> DocState {
        let _guard = self.locks.acquire(&record.reference).await;
        record.reset();
        self.pipeline.evaluate(record, FetchPhase::Metadata)
    }

    /// Processes many documents with bounded concurrency
    ///
    /// Returns the number of documents processed. The first staging failure
    /// stops further work and is returned once running workers finish.
    pub async fn process_all(
        self: &Arc<Self>,
        records: impl IntoIterator<Item = DocumentRecord>,
        concurrency: usize,
    ) -> Result<u64, SiftError> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut processed = 0u64;
        let mut first_error = None;

        for record in records {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| SiftError::Task(e.to_string()))?;

            while let Some(done) = workers.try_join_next() {
                Self::settle(done, &mut processed, &mut first_error);
            }
            if first_error.is_some() {
                break;
            }

            let coordinator = Arc::clone(self);
            workers.spawn(async move {
                let _permit = permit;
                coordinator.process(record).await
            });
        }

        while let Some(done) = workers.join_next().await {
            Self::settle(done, &mut processed, &mut first_error);
        }

        tracing::info!("Processed {} documents", processed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(processed),
        }
    }

    fn settle(
        done: Result<Result<DocState, SiftError>, tokio::task::JoinError>,
        processed: &mut u64,
        first_error: &mut Option<SiftError>,
    ) {
        let result = done.map_err(|e| SiftError::Task(e.to_string())).and_then(|r| r);
        match result {
            Ok(_) => *processed += 1,
            Err(e) => {
                tracing::error!("Document processing failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    fn count(&self, state: DocState) {
        let mut counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        *counts.entry(state).or_insert(0) += 1;
    }

    /// Number of documents that ended in each state
    pub fn state_counts(&self) -> HashMap<DocState, u64> {
        self.counts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
