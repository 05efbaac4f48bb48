//! Background flusher
//!
//! Wakes up whenever a batch becomes ready, and on every flush interval
//! force-closes the open batch so that a slow crawl still delivers.

use crate::queue::{CommitQueue, QueueError, QueueResult};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest timed close the flusher will run
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running background flusher
pub struct Flusher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Flusher {
    /// Stops the flusher after its current flush, if any, completes
    pub async fn stop(self) -> QueueResult<()> {
        let _ = self.stop.send(true);
        self.handle
            .await
            .map_err(|e| QueueError::Task(e.to_string()))
    }
}

impl CommitQueue {
    /// Spawns the background flusher on the current runtime
    pub fn spawn_flusher(&self) -> Flusher {
        let (stop, mut stopped) = watch::channel(false);
        let queue = self.clone();

        let handle = tokio::spawn(async move {
            let period = queue.config().flush_interval.max(MIN_FLUSH_INTERVAL);
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            tick.tick().await;

            let mut reported_halt = false;
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = queue.ready_signal().notified() => {}
                    _ = tick.tick() => {
                        if let Err(e) = queue.close_current_batch().await {
                            tracing::warn!("Timed batch close failed: {}", e);
                        }
                    }
                }

                match queue.flush_ready().await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Background flush delivered {} batches", n),
                    Err(e) => tracing::error!("Background flush failed: {}", e),
                }

                let halted = queue.is_halted();
                if halted && !reported_halt {
                    tracing::error!("Flushing halted; staged batches kept until resumed");
                }
                reported_halt = halted;
            }
            tracing::debug!("Background flusher stopped");
        });

        Flusher { stop, handle }
    }
}
