//! Crawler-facing side of the pipeline
//!
//! This module contains the glue between a fetcher and the commit queue:
//! - Reference-exclusive, concurrent document evaluation
//! - Hand-off of accepted and deleted documents to the queue
//! - A complete session: recover, process, drain, close

mod coordinator;
mod input;

pub use coordinator::{Coordinator, ReferenceGuard, ReferenceLocks};
pub use input::{read_documents, DocumentInput};

use crate::checksum::open_store;
use crate::committer::Committer;
use crate::config::Config;
use crate::document::{DocState, DocumentRecord};
use crate::pipeline::Pipeline;
use crate::queue::{CommitQueue, QueueConfig, QueueStats, RecoveryReport};
use crate::SiftError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a complete session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub recovery: RecoveryReport,
    pub documents: u64,
    pub states: HashMap<DocState, u64>,
    pub queue: QueueStats,
}

/// Runs a complete session over a set of fetched documents
///
/// This is the main entry point for evaluating a crawl. It will:
/// 1. Open the checksum store and build the pipeline
/// 2. Open the commit queue and recover batches from a previous session
/// 3. Evaluate documents concurrently and stage the resulting requests
/// 4. Deliver every staged batch and close the committer
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `committer` - Downstream sink
/// * `records` - Fetched documents
///
/// # Returns
///
/// * `Ok(SessionSummary)` - Everything was delivered
/// * `Err(SiftError)` - Startup failed, staging failed, or flushing halted
pub async fn run_session(
    config: &Config,
    committer: Box<dyn Committer>,
    records: Vec<DocumentRecord>,
) -> Result<SessionSummary, SiftError> {
    let store_path = config
        .checksum
        .as_ref()
        .and_then(|c| c.database_path.as_deref())
        .map(Path::new);
    let store = open_store(store_path)?;
    let pipeline = Pipeline::from_config(config, Arc::clone(&store))?;
    tracing::info!("Pipeline ready with {} stages", pipeline.stages().len());

    let queue = CommitQueue::open(
        QueueConfig::from(&config.queue),
        committer,
        Some(Arc::clone(&store)),
    )
    .await?;
    let recovery = queue.recover().await?;
    let flusher = queue.spawn_flusher();

    let coordinator = Arc::new(Coordinator::new(pipeline, queue.clone()));
    let processed = coordinator
        .process_all(records, config.pipeline.workers)
        .await;

    flusher.stop().await?;
    let documents = processed?;
    let stats = queue.shutdown().await?;
    store.flush()?;

    let states = coordinator.state_counts();
    for state in DocState::all_states() {
        if let Some(count) = states.get(&state) {
            tracing::info!("{}: {}", state, count);
        }
    }

    Ok(SessionSummary {
        recovery,
        documents,
        states,
        queue: stats,
    })
}
