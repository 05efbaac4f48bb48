//! Commit queue
//!
//! Submitters reserve a position in the open batch under a short lock,
//! write their request file outside the lock, and report back. The last
//! writer of a full batch writes its manifest, which makes the batch ready.
//! A single flusher hands ready batches to the committer in batch id order.

use crate::checksum::ChecksumStore;
use crate::committer::{Committer, CommitterRequest};
use crate::queue::layout::{self, StagingScan};
use crate::queue::staged::{self, BatchManifest, LoadedRequest};
use crate::queue::{io_error, QueueConfig, QueueError, QueueResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, OnceCell};

/// A batch that is open or still being written
#[derive(Debug)]
struct BatchSlot {
    folder: u64,
    dir: PathBuf,

    /// Set once the directory is durably on disk
    created: Arc<OnceCell<()>>,

    /// Positions handed out so far
    assigned: u32,

    /// Positions whose write finished, successfully or not
    settled: u32,

    /// Positions whose request file is on disk
    written: BTreeSet<u32>,

    /// No further positions will be handed out
    sealed: bool,

    /// Someone is writing the manifest
    finalizing: bool,
}

impl BatchSlot {
    fn new(folder: u64, dir: PathBuf) -> Self {
        Self {
            folder,
            dir,
            created: Arc::new(OnceCell::new()),
            assigned: 0,
            settled: 0,
            written: BTreeSet::new(),
            sealed: false,
            finalizing: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.sealed && self.settled == self.assigned && !self.finalizing
    }
}

/// A position handed out to a submitter
struct Reservation {
    batch_id: u64,
    dir: PathBuf,
    position: u32,
    created: Arc<OnceCell<()>>,
}

/// A closed batch waiting for delivery
#[derive(Debug, Clone)]
struct ReadyBatch {
    folder: u64,
    dir: PathBuf,
    positions: Vec<u32>,
}

#[derive(Debug, Default)]
struct Counters {
    staged_requests: u64,
    failed_writes: u64,
    flushed_batches: u64,
    flushed_requests: u64,
    recovered_batches: u64,
}

#[derive(Debug)]
struct QueueState {
    recovered: bool,
    next_batch_id: u64,
    current_folder: u64,
    batches_in_folder: usize,

    /// Id of the batch currently accepting requests
    open: Option<u64>,

    /// Open and sealed batches whose manifest is not written yet
    pending: BTreeMap<u64, BatchSlot>,

    /// Closed batches in creation order
    ready: BTreeMap<u64, ReadyBatch>,

    /// Reason flushing stopped, if it did
    halted: Option<String>,

    counters: Counters,
}

impl QueueState {
    fn new() -> Self {
        Self {
            recovered: false,
            next_batch_id: 1,
            current_folder: 1,
            batches_in_folder: 0,
            open: None,
            pending: BTreeMap::new(),
            ready: BTreeMap::new(),
            halted: None,
            counters: Counters::default(),
        }
    }

    /// Closed batches not yet delivered, including those still being written
    fn backlog(&self) -> usize {
        self.ready.len() + self.pending.values().filter(|s| s.sealed).count()
    }

    /// Lowest ready batch that no older batch is still blocking
    fn next_flushable(&self) -> Option<(u64, ReadyBatch)> {
        let (&id, batch) = self.ready.iter().next()?;
        match self.pending.keys().next() {
            Some(&pending) if pending < id => None,
            _ => Some((id, batch.clone())),
        }
    }
}

/// Snapshot of queue activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Closed batches waiting for delivery
    pub ready_batches: usize,

    /// Batches still accepting or writing requests
    pub open_batches: usize,

    /// Requests reserved in batches that are not closed yet
    pub open_requests: usize,

    /// Requests in closed batches waiting for delivery
    pub ready_requests: usize,

    pub staged_requests: u64,
    pub failed_writes: u64,
    pub flushed_batches: u64,
    pub flushed_requests: u64,
    pub recovered_batches: u64,

    pub halted: Option<String>,
}

/// What recovery found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Batches re-queued for delivery
    pub batches: usize,

    /// Requests in those batches
    pub requests: usize,

    /// Batches that were still open when the previous session ended
    pub finalized: usize,

    /// Empty batch directories discarded
    pub discarded: usize,
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    committer: tokio::sync::Mutex<Box<dyn Committer>>,
    store: Option<Arc<dyn ChecksumStore>>,

    /// Batch id mark last written to disk
    persisted_next_id: tokio::sync::Mutex<u64>,

    /// Signalled whenever the backlog shrinks
    drained: Notify,

    /// Signalled whenever a batch becomes ready
    ready: Notify,
}

/// Durable, batched, ordered hand-off to a committer
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct CommitQueue {
    inner: Arc<QueueInner>,
}

impl CommitQueue {
    /// Opens a queue over a staging directory and initializes the committer
    ///
    /// The queue refuses submissions until [`CommitQueue::recover`] has run.
    ///
    /// # Arguments
    ///
    /// * `config` - Queue configuration
    /// * `committer` - Downstream sink
    /// * `store` - Checksum store updated after each delivered batch
    pub async fn open(
        config: QueueConfig,
        mut committer: Box<dyn Committer>,
        store: Option<Arc<dyn ChecksumStore>>,
    ) -> QueueResult<Self> {
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(io_error(&config.directory))?;
        if let Some(parent) = config.directory.parent().filter(|p| !p.as_os_str().is_empty()) {
            layout::sync_dir(parent).await.map_err(io_error(parent))?;
        }
        committer.init().await?;

        tracing::info!("Commit queue opened at {}", config.directory.display());
        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::new()),
                committer: tokio::sync::Mutex::new(committer),
                store,
                persisted_next_id: tokio::sync::Mutex::new(1),
                drained: Notify::new(),
                ready: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn state(&self) -> QueueResult<MutexGuard<'_, QueueState>> {
        self.inner.state.lock().map_err(|_| QueueError::LockPoisoned)
    }

    pub(crate) fn ready_signal(&self) -> &Notify {
        &self.inner.ready
    }

    /// Re-queues batches left on disk by a previous session
    ///
    /// Closed batches are queued as they are. Batches without a manifest are
    /// closed with the request files that made it to disk. Everything found
    /// is delivered before any batch created by this session. Calling it
    /// again once recovered does nothing.
    pub async fn recover(&self) -> QueueResult<RecoveryReport> {
        if self.state()?.recovered {
            return Ok(RecoveryReport::default());
        }

        let root = self.inner.config.directory.clone();
        let scan: StagingScan = tokio::task::spawn_blocking({
            let root = root.clone();
            move || layout::scan_staging(&root)
        })
        .await
        .map_err(|e| QueueError::Task(e.to_string()))?
        .map_err(io_error(&root))?;

        let mut report = RecoveryReport::default();
        let mut ready = BTreeMap::new();
        let mut last_batch = 0;

        for batch in &scan.batches {
            last_batch = last_batch.max(batch.batch);

            let positions = if batch.closed {
                staged::read_manifest(&batch.path).await?.positions
            } else {
                let positions = readable_positions(&batch.path, &batch.positions).await;
                if positions.is_empty() {
                    layout::remove_batch(&batch.path)
                        .await
                        .map_err(io_error(&batch.path))?;
                    report.discarded += 1;
                    continue;
                }
                let manifest = BatchManifest::new(batch.batch, batch.folder, positions.clone());
                staged::write_manifest(&batch.path, &manifest).await?;
                report.finalized += 1;
                positions
            };

            report.batches += 1;
            report.requests += positions.len();
            ready.insert(
                batch.batch,
                ReadyBatch {
                    folder: batch.folder,
                    dir: batch.path.clone(),
                    positions,
                },
            );
        }

        let current_folder = scan.last_folder.unwrap_or(1);
        let batches_in_folder = scan
            .batches
            .iter()
            .filter(|b| b.folder == current_folder)
            .count();

        let stored_next_id = read_next_batch_id(&root).await;
        *self.inner.persisted_next_id.lock().await = stored_next_id;

        let has_ready = !ready.is_empty();
        {
            let mut state = self.state()?;
            state.ready = ready;
            state.next_batch_id = (last_batch + 1).max(stored_next_id);
            state.current_folder = current_folder;
            state.batches_in_folder = batches_in_folder;
            state.counters.recovered_batches += report.batches as u64;
            state.recovered = true;
        }
        if has_ready {
            self.inner.ready.notify_one();
        }

        tracing::info!(
            "Recovered {} batches ({} requests, {} finalized, {} discarded)",
            report.batches,
            report.requests,
            report.finalized,
            report.discarded
        );
        Ok(report)
    }

    /// Stages a request
    ///
    /// Returns once the request is durably on disk. Blocks while the number
    /// of undelivered closed batches is at its limit.
    pub async fn submit(&self, request: CommitterRequest) -> QueueResult<()> {
        self.submit_with_signature(request, None).await
    }

    /// Stages a request along with the signature to store once it is delivered
    pub async fn submit_with_signature(
        &self,
        request: CommitterRequest,
        signature: Option<String>,
    ) -> QueueResult<()> {
        let Reservation {
            batch_id,
            dir,
            position,
            created,
        } = self.reserve().await?;

        let result = async {
            created
                .get_or_try_init(|| self.create_batch(batch_id, &dir))
                .await?;
            staged::stage_request(
                &dir,
                position,
                &request,
                signature.as_deref(),
                self.inner.config.inline_content_limit,
            )
            .await
        }
        .await;

        let written = result.is_ok();
        if let Err(e) = &result {
            tracing::warn!(
                "Failed to stage {} for {}: {}",
                request.operation(),
                request.reference(),
                e
            );
        } else {
            tracing::debug!(
                "Staged {} for {} in batch {} at {}",
                request.operation(),
                request.reference(),
                batch_id,
                position
            );
        }

        let finalize = {
            let mut state = self.state()?;
            if written {
                state.counters.staged_requests += 1;
            } else {
                state.counters.failed_writes += 1;
            }
            match state.pending.get_mut(&batch_id) {
                Some(slot) => {
                    slot.settled += 1;
                    if written {
                        slot.written.insert(position);
                    }
                    take_if_complete(slot)
                }
                None => None,
            }
        };

        if let Some(job) = finalize {
            self.finalize(batch_id, job).await;
        }
        result
    }

    /// Creates a batch directory before its first request is written
    ///
    /// The directory entry is synced into its folder and the root, and the
    /// id is recorded so a later session never hands it out again.
    async fn create_batch(&self, batch_id: u64, dir: &Path) -> QueueResult<()> {
        layout::create_batch_dir(dir).await.map_err(io_error(dir))?;

        let mut persisted = self.inner.persisted_next_id.lock().await;
        if batch_id >= *persisted {
            let path = layout::next_batch_file(&self.inner.config.directory);
            staged::write_durable(&path, (batch_id + 1).to_string().as_bytes()).await?;
            *persisted = batch_id + 1;
        }
        Ok(())
    }

    /// Reserves the next position, opening a batch if needed
    async fn reserve(&self) -> QueueResult<Reservation> {
        loop {
            let drained = self.inner.drained.notified();
            {
                let mut state = self.state()?;
                if !state.recovered {
                    return Err(QueueError::NotRecovered);
                }

                let full = state.open.is_none()
                    && state.backlog() >= self.inner.config.max_pending_batches;
                if !full {
                    return Ok(self.assign(&mut state));
                }
            }
            tracing::debug!("Staging backlog full, waiting for a flush");
            drained.await;
        }
    }

    fn assign(&self, state: &mut QueueState) -> Reservation {
        let config = &self.inner.config;
        let batch_id = match state.open {
            Some(id) => id,
            None => {
                if state.batches_in_folder >= config.max_per_folder {
                    state.current_folder += 1;
                    state.batches_in_folder = 0;
                }
                state.batches_in_folder += 1;

                let id = state.next_batch_id;
                state.next_batch_id += 1;
                state.open = Some(id);
                id
            }
        };

        let folder = state.current_folder;
        let slot = state.pending.entry(batch_id).or_insert_with(|| {
            BatchSlot::new(folder, layout::batch_path(&config.directory, folder, batch_id))
        });
        let reservation = Reservation {
            batch_id,
            dir: slot.dir.clone(),
            position: slot.assigned,
            created: Arc::clone(&slot.created),
        };
        slot.assigned += 1;
        if slot.assigned as usize >= config.batch_size {
            slot.sealed = true;
            state.open = None;
        }
        reservation
    }

    /// Closes the open batch even if it is not full
    ///
    /// Returns true if a batch was closed.
    pub async fn close_current_batch(&self) -> QueueResult<bool> {
        let (batch_id, finalize) = {
            let mut state = self.state()?;
            let Some(id) = state.open.take() else {
                return Ok(false);
            };
            let finalize = match state.pending.get_mut(&id) {
                Some(slot) => {
                    slot.sealed = true;
                    take_if_complete(slot)
                }
                None => None,
            };
            (id, finalize)
        };

        tracing::debug!("Closed batch {}", batch_id);
        if let Some(job) = finalize {
            self.finalize(batch_id, job).await;
        }
        Ok(true)
    }

    /// Writes the manifest of a complete batch and moves it to the ready set
    ///
    /// A failed manifest write halts flushing, since later batches must not
    /// overtake this one.
    async fn finalize(&self, batch_id: u64, job: FinalizeJob) {
        let outcome = if job.positions.is_empty() {
            // Every write failed; the directory may not even exist.
            if job.dir.exists() {
                layout::remove_batch(&job.dir)
                    .await
                    .map_err(io_error(&job.dir))
                    .map(|_| false)
            } else {
                Ok(false)
            }
        } else {
            let manifest = BatchManifest::new(batch_id, job.folder, job.positions.clone());
            staged::write_manifest(&job.dir, &manifest).await.map(|_| true)
        };

        let mut notify_ready = false;
        let mut notify_drained = false;
        {
            // The outcome is already on disk, so it is recorded even if
            // another thread panicked while holding the lock.
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(poisoned) => {
                    tracing::error!(
                        "Queue state lock poisoned while closing batch {}",
                        batch_id
                    );
                    poisoned.into_inner()
                }
            };
            match outcome {
                Ok(has_requests) => {
                    state.pending.remove(&batch_id);
                    if has_requests {
                        tracing::debug!(
                            "Batch {} ready ({} requests)",
                            batch_id,
                            job.positions.len()
                        );
                        state.ready.insert(
                            batch_id,
                            ReadyBatch {
                                folder: job.folder,
                                dir: job.dir,
                                positions: job.positions,
                            },
                        );
                        notify_ready = true;
                    } else {
                        notify_drained = true;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to close batch {}: {}", batch_id, e);
                    if let Some(slot) = state.pending.get_mut(&batch_id) {
                        slot.finalizing = false;
                    }
                    state.halted = Some(format!("batch {} could not be closed: {}", batch_id, e));
                }
            }
        }

        if notify_ready {
            self.inner.ready.notify_one();
        }
        if notify_drained {
            self.inner.drained.notify_waiters();
        }
    }

    /// Delivers every batch that is ready, in order
    ///
    /// Only one flush runs at a time. Returns the number of batches
    /// delivered. A halted queue delivers nothing until resumed.
    pub async fn flush_ready(&self) -> QueueResult<usize> {
        let mut committer = self.inner.committer.lock().await;
        let mut flushed = 0;

        loop {
            let next = {
                let state = self.state()?;
                if state.halted.is_some() {
                    break;
                }
                state.next_flushable()
            };
            let Some((batch_id, batch)) = next else {
                break;
            };

            self.flush_batch(&mut **committer, batch_id, &batch).await?;
            flushed += 1;
        }

        Ok(flushed)
    }

    async fn flush_batch(
        &self,
        committer: &mut dyn Committer,
        batch_id: u64,
        batch: &ReadyBatch,
    ) -> QueueResult<()> {
        let loaded = match load_batch(&batch.dir, &batch.positions).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.halt(format!("batch {} unreadable: {}", batch_id, e))?;
                return Err(e);
            }
        };
        let requests: Vec<CommitterRequest> =
            loaded.iter().map(|l| l.request.clone()).collect();

        let config = &self.inner.config;
        let mut attempts = 0;
        let mut delay = config.retry_delay;
        loop {
            attempts += 1;
            match committer.commit_batch(&requests).await {
                Ok(()) => break,
                Err(source) if attempts > config.max_retries => {
                    tracing::error!(
                        "Batch {} failed after {} attempts, halting flush: {}",
                        batch_id,
                        attempts,
                        source
                    );
                    self.halt(format!("batch {} rejected: {}", batch_id, source))?;
                    return Err(QueueError::CommitterFlush {
                        batch_id,
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Batch {} attempt {} failed, retrying in {:?}: {}",
                        batch_id,
                        attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(config.max_retry_delay);
                }
            }
        }

        // Delivered. Staged data goes first, then signatures advance.
        if let Err(e) = layout::remove_batch(&batch.dir).await {
            self.halt(format!("batch {} delivered but not removed: {}", batch_id, e))?;
            return Err(io_error(&batch.dir)(e));
        }
        let current_folder = self.state()?.current_folder;
        if batch.folder != current_folder {
            layout::remove_folder_if_empty(&layout::folder_path(
                &config.directory,
                batch.folder,
            ))
            .await;
        }

        self.apply_signatures(loaded).await;

        {
            let mut state = self.state()?;
            state.ready.remove(&batch_id);
            state.counters.flushed_batches += 1;
            state.counters.flushed_requests += requests.len() as u64;
        }
        self.inner.drained.notify_waiters();

        tracing::info!("Flushed batch {} ({} requests)", batch_id, requests.len());
        Ok(())
    }

    /// Records delivered signatures in the checksum store
    ///
    /// A failure here only means the document is sent again next crawl.
    async fn apply_signatures(&self, loaded: Vec<LoadedRequest>) {
        let Some(store) = self.inner.store.clone() else {
            return;
        };

        let result = tokio::task::spawn_blocking(move || {
            for item in &loaded {
                let reference = item.request.reference();
                let outcome = match (&item.request, &item.signature) {
                    (CommitterRequest::Delete(_), _) => store.remove(reference),
                    (CommitterRequest::Upsert(_), Some(signature)) => {
                        store.put(reference, signature)
                    }
                    (CommitterRequest::Upsert(_), None) => Ok(()),
                };
                if let Err(e) = outcome {
                    tracing::warn!("Failed to update signature for {}: {}", reference, e);
                }
            }
        })
        .await;

        if let Err(e) = result {
            tracing::warn!("Signature update task failed: {}", e);
        }
    }

    fn halt(&self, reason: String) -> QueueResult<()> {
        self.state()?.halted = Some(reason);
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.state().map(|s| s.halted.is_some()).unwrap_or(true)
    }

    /// Clears a halt and retries closing any batch that failed to close
    ///
    /// Delivery resumes on the next flush.
    pub async fn resume(&self) -> QueueResult<()> {
        let jobs: Vec<(u64, FinalizeJob)> = {
            let mut state = self.state()?;
            if let Some(reason) = state.halted.take() {
                tracing::info!("Resuming flush after halt: {}", reason);
            }
            state
                .pending
                .iter_mut()
                .filter_map(|(&id, slot)| take_if_complete(slot).map(|job| (id, job)))
                .collect()
        };

        for (batch_id, job) in jobs {
            self.finalize(batch_id, job).await;
        }
        let halted = self.state()?.halted.clone();
        if let Some(reason) = halted {
            return Err(QueueError::FlushHalted(reason));
        }
        self.inner.ready.notify_one();
        Ok(())
    }

    /// Current backlog and counters
    pub fn stats(&self) -> QueueResult<QueueStats> {
        let state = self.state()?;
        Ok(QueueStats {
            ready_batches: state.ready.len(),
            open_batches: state.pending.len(),
            open_requests: state.pending.values().map(|s| s.assigned as usize).sum(),
            ready_requests: state.ready.values().map(|b| b.positions.len()).sum(),
            staged_requests: state.counters.staged_requests,
            failed_writes: state.counters.failed_writes,
            flushed_batches: state.counters.flushed_batches,
            flushed_requests: state.counters.flushed_requests,
            recovered_batches: state.counters.recovered_batches,
            halted: state.halted.clone(),
        })
    }

    /// Deletes everything staged and resets the committer
    ///
    /// Must not run while requests are being submitted.
    pub async fn clean(&self) -> QueueResult<()> {
        let mut committer = self.inner.committer.lock().await;
        let root = &self.inner.config.directory;

        {
            let mut state = self.state()?;
            let recovered = state.recovered;
            *state = QueueState::new();
            state.recovered = recovered;
        }
        if root.exists() {
            tokio::fs::remove_dir_all(root).await.map_err(io_error(root))?;
        }
        tokio::fs::create_dir_all(root).await.map_err(io_error(root))?;
        *self.inner.persisted_next_id.lock().await = 1;
        committer.clean().await?;
        self.inner.drained.notify_waiters();

        tracing::info!("Cleaned staging area {}", root.display());
        Ok(())
    }

    /// Closes the open batch, delivers everything and closes the committer
    ///
    /// If flushing is halted the committer is left open and the remaining
    /// batches stay on disk for the next session.
    pub async fn shutdown(&self) -> QueueResult<QueueStats> {
        self.close_current_batch().await?;
        self.flush_ready().await?;

        let stats = self.stats()?;
        if let Some(reason) = stats.halted.clone() {
            tracing::error!(
                "Shutting down with {} undelivered batches: {}",
                stats.ready_batches + stats.open_batches,
                reason
            );
            return Err(QueueError::FlushHalted(reason));
        }

        self.inner.committer.lock().await.close().await?;
        tracing::info!(
            "Commit queue shut down: {} batches, {} requests delivered",
            stats.flushed_batches,
            stats.flushed_requests
        );
        Ok(stats)
    }
}

/// Work needed to close a batch, taken out of the lock
struct FinalizeJob {
    folder: u64,
    dir: PathBuf,
    positions: Vec<u32>,
}

fn take_if_complete(slot: &mut BatchSlot) -> Option<FinalizeJob> {
    if !slot.is_complete() {
        return None;
    }
    slot.finalizing = true;
    Some(FinalizeJob {
        folder: slot.folder,
        dir: slot.dir.clone(),
        positions: slot.written.iter().copied().collect(),
    })
}

/// Lowest batch id a previous session never handed out
///
/// A missing or unreadable mark means ids start at 1.
async fn read_next_batch_id(root: &Path) -> u64 {
    let path = layout::next_batch_file(root);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => text.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unreadable batch id mark {}", path.display());
            1
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 1,
        Err(e) => {
            tracing::warn!("Failed to read batch id mark {}: {}", path.display(), e);
            1
        }
    }
}

/// Positions of an interrupted batch whose request files parse
async fn readable_positions(batch_dir: &Path, positions: &[u32]) -> Vec<u32> {
    let mut readable = Vec::with_capacity(positions.len());
    for &position in positions {
        let path = layout::request_file(batch_dir, position);
        match staged::read_staged(&path).await {
            Ok(_) => readable.push(position),
            Err(e) => tracing::warn!("Dropping unreadable staged request: {}", e),
        }
    }
    readable
}

async fn load_batch(batch_dir: &Path, positions: &[u32]) -> QueueResult<Vec<LoadedRequest>> {
    let mut loaded = Vec::with_capacity(positions.len());
    for &position in positions {
        loaded.push(staged::load_request(batch_dir, position).await?);
    }
    Ok(loaded)
}
