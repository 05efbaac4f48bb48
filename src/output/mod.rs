//! Output module for session summaries and statistics
//!
//! This module handles:
//! - Printing the outcome of a session
//! - Inspecting the staging area and checksum store (`--stats`)

pub mod stats;

pub use stats::{load_statistics, print_statistics, StagingStatistics};

use crate::crawler::SessionSummary;
use crate::document::DocState;

/// Prints a session summary to stdout
///
/// # Arguments
///
/// * `summary` - The summary returned by a completed session
pub fn print_session_summary(summary: &SessionSummary) {
    println!("=== Session Summary ===\n");

    if summary.recovery.batches > 0 {
        println!(
            "Recovered: {} batches ({} requests) from a previous session",
            summary.recovery.batches, summary.recovery.requests
        );
        println!();
    }

    println!("Documents: {}", summary.documents);
    for state in DocState::all_states() {
        let count = summary.states.get(&state).copied().unwrap_or(0);
        if count > 0 {
            let percentage = if summary.documents > 0 {
                (count as f64 / summary.documents as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", state, count, percentage);
        }
    }
    println!();

    println!("Delivered:");
    println!("  Batches: {}", summary.queue.flushed_batches);
    println!("  Requests: {}", summary.queue.flushed_requests);
    if summary.queue.failed_writes > 0 {
        println!("  Failed staging writes: {}", summary.queue.failed_writes);
    }
}
