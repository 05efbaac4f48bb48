use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_sift::committer::{
    Committer, CommitterError, CommitterRequest, CommitterResult, DeleteRequest,
    MemoryCommitter, UpsertRequest,
};
use sumi_sift::document::Metadata;
use sumi_sift::queue::{CommitQueue, QueueConfig};

/// Queue configuration with short retry delays
pub fn queue_config(dir: &Path, batch_size: usize, max_per_folder: usize) -> QueueConfig {
    QueueConfig {
        batch_size,
        max_per_folder,
        max_retries: 1,
        retry_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(2),
        ..QueueConfig::new(dir)
    }
}

/// Opens and recovers a queue delivering to a memory committer
pub async fn open_queue(config: QueueConfig, committer: &MemoryCommitter) -> CommitQueue {
    let queue = CommitQueue::open(config, Box::new(committer.clone()), None)
        .await
        .unwrap();
    queue.recover().await.unwrap();
    queue
}

pub fn upsert(reference: &str) -> CommitterRequest {
    CommitterRequest::upsert(
        reference,
        Metadata::new().with("title", reference),
        Some(format!("content of {}", reference).as_str().into()),
    )
}

/// Committer that fails every delivery while its switch is on
#[derive(Clone)]
pub struct SwitchableCommitter {
    pub failing: Arc<AtomicBool>,
    pub inner: MemoryCommitter,
}

impl SwitchableCommitter {
    pub fn new(failing: bool) -> Self {
        Self {
            failing: Arc::new(AtomicBool::new(failing)),
            inner: MemoryCommitter::new(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> CommitterResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CommitterError::Unavailable("index offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Committer for SwitchableCommitter {
    async fn init(&mut self) -> CommitterResult<()> {
        self.inner.init().await
    }

    async fn upsert(&mut self, request: &UpsertRequest) -> CommitterResult<()> {
        self.check()?;
        self.inner.upsert(request).await
    }

    async fn delete(&mut self, request: &DeleteRequest) -> CommitterResult<()> {
        self.check()?;
        self.inner.delete(request).await
    }

    async fn close(&mut self) -> CommitterResult<()> {
        self.inner.close().await
    }

    async fn clean(&mut self) -> CommitterResult<()> {
        self.inner.clean().await
    }
}
