//! Statistics from the staging area and checksum store
//!
//! This module provides functionality for inspecting what a previous
//! session left behind, without opening a committer.

use crate::checksum::ChecksumStore;
use crate::queue::{scan_staging, QueueError};
use crate::SiftError;
use std::collections::BTreeSet;
use std::path::Path;

/// Staging and change-detection summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingStatistics {
    /// Batches with a manifest, ready for delivery
    pub closed_batches: u64,

    /// Batches without a manifest, finalized by the next recovery
    pub unclosed_batches: u64,

    /// Request files across all batches
    pub pending_requests: u64,

    /// Folders holding at least one batch
    pub folders: u64,

    /// Oldest and newest batch ids on disk
    pub batch_range: Option<(u64, u64)>,

    /// Signatures in the checksum store, if one is configured
    pub stored_signatures: Option<u64>,
}

/// Loads statistics from a staging directory and an optional store
///
/// # Arguments
///
/// * `staging` - Root of the staging area
/// * `store` - The checksum store to count, if any
///
/// # Returns
///
/// * `Ok(StagingStatistics)` - Successfully loaded statistics
/// * `Err(SiftError)` - Failed to scan the staging area or query the store
pub fn load_statistics(
    staging: &Path,
    store: Option<&dyn ChecksumStore>,
) -> Result<StagingStatistics, SiftError> {
    let scan = scan_staging(staging).map_err(|source| QueueError::Io {
        path: staging.to_path_buf(),
        source,
    })?;

    let mut stats = StagingStatistics::default();
    let mut folders = BTreeSet::new();
    for batch in &scan.batches {
        if batch.closed {
            stats.closed_batches += 1;
        } else {
            stats.unclosed_batches += 1;
        }
        stats.pending_requests += batch.positions.len() as u64;
        folders.insert(batch.folder);
    }
    stats.folders = folders.len() as u64;
    stats.batch_range = match (scan.batches.first(), scan.batches.last()) {
        (Some(first), Some(last)) => Some((first.batch, last.batch)),
        _ => None,
    };

    if let Some(store) = store {
        stats.stored_signatures = Some(store.count()?);
    }

    Ok(stats)
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StagingStatistics) {
    println!("=== Staging Statistics ===\n");

    println!("Commit queue:");
    println!("  Closed batches: {}", stats.closed_batches);
    println!("  Unclosed batches: {}", stats.unclosed_batches);
    println!("  Pending requests: {}", stats.pending_requests);
    println!("  Folders: {}", stats.folders);
    if let Some((first, last)) = stats.batch_range {
        println!("  Batch ids: {} to {}", first, last);
    }
    println!();

    match stats.stored_signatures {
        Some(count) => println!("Checksum store: {} signatures", count),
        None => println!("Checksum store: not configured"),
    }

    if stats.closed_batches + stats.unclosed_batches == 0 {
        println!("\nNothing pending; the last session delivered everything.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::MemoryChecksumStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_statistics() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for (folder, batch, closed, requests) in [(1, 1, true, 3), (1, 2, false, 1), (2, 3, true, 2)] {
            let path = root.join(format!("{:06}", folder)).join(format!("{:06}", batch));
            fs::create_dir_all(&path).unwrap();
            for position in 0..requests {
                fs::write(path.join(format!("{:06}.json", position)), b"{}").unwrap();
            }
            if closed {
                fs::write(path.join("manifest.json"), b"{}").unwrap();
            }
        }

        let store = MemoryChecksumStore::new();
        store.put("a", "sig").unwrap();

        let stats = load_statistics(root, Some(&store)).unwrap();
        assert_eq!(stats.closed_batches, 2);
        assert_eq!(stats.unclosed_batches, 1);
        assert_eq!(stats.pending_requests, 6);
        assert_eq!(stats.folders, 2);
        assert_eq!(stats.batch_range, Some((1, 3)));
        assert_eq!(stats.stored_signatures, Some(1));
    }

    #[test]
    fn test_empty_staging() {
        let dir = TempDir::new().unwrap();
        let stats = load_statistics(&dir.path().join("none"), None).unwrap();
        assert_eq!(stats, StagingStatistics::default());
    }
}
