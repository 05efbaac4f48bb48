//! On-disk layout of the staging area
//!
//! ```text
//! <root>/
//!   000001/                  folder
//!     000001/                batch (ids are global, not per folder)
//!       000000.json          staged request at position 0
//!       000000.content       content artifact for position 0, if any
//!       manifest.json        present once the batch is closed
//!   000002/
//!     000501/
//! ```
//!
//! Every file is written to a `.tmp` sibling and renamed into place, so a
//! crash leaves either the complete file or a `.tmp` leftover. Removed
//! batches are renamed to `<id>.trash` before deletion, so a crash halfway
//! through a removal never leaves a batch that looks valid but is partial.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
const NEXT_BATCH_FILE: &str = "next-batch-id";
pub(crate) const TMP_SUFFIX: &str = "tmp";
const TRASH_SUFFIX: &str = "trash";

/// Formats a folder or batch id as a directory name
pub fn dir_name(id: u64) -> String {
    format!("{:06}", id)
}

pub fn folder_path(root: &Path, folder: u64) -> PathBuf {
    root.join(dir_name(folder))
}

pub fn batch_path(root: &Path, folder: u64, batch: u64) -> PathBuf {
    folder_path(root, folder).join(dir_name(batch))
}

pub fn request_file(batch_dir: &Path, position: u32) -> PathBuf {
    batch_dir.join(format!("{:06}.json", position))
}

pub fn content_file_name(position: u32) -> String {
    format!("{:06}.content", position)
}

pub fn manifest_file(batch_dir: &Path) -> PathBuf {
    batch_dir.join(MANIFEST_FILE)
}

/// File holding the lowest batch id never handed out
pub fn next_batch_file(root: &Path) -> PathBuf {
    root.join(NEXT_BATCH_FILE)
}

/// Path of the temporary sibling used while writing `path`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// A batch directory found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedBatch {
    pub folder: u64,
    pub batch: u64,
    pub path: PathBuf,

    /// Whether the manifest exists
    pub closed: bool,

    /// Positions of complete request files, ascending
    pub positions: Vec<u32>,
}

/// Result of scanning the staging area
#[derive(Debug, Clone, Default)]
pub struct StagingScan {
    /// Batches in creation order
    pub batches: Vec<ScannedBatch>,

    /// Highest folder id present, including empty folders
    pub last_folder: Option<u64>,
}

fn parse_id(name: &str) -> Option<u64> {
    if name.len() >= 6 && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

fn is_leftover(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(TMP_SUFFIX) | Some(TRASH_SUFFIX)
    )
}

fn remove_leftover(path: &Path) -> io::Result<()> {
    tracing::debug!("Removing staging leftover {}", path.display());
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Scans the staging area
///
/// Leftovers from interrupted writes and removals are deleted along the
/// way. A missing root is an empty staging area.
pub fn scan_staging(root: &Path) -> io::Result<StagingScan> {
    let mut scan = StagingScan::default();
    if !root.exists() {
        return Ok(scan);
    }

    for folder_entry in fs::read_dir(root)? {
        let folder_entry = folder_entry?;
        let folder_dir = folder_entry.path();
        if is_leftover(&folder_dir) {
            remove_leftover(&folder_dir)?;
            continue;
        }
        let Some(folder) = folder_entry.file_name().to_str().and_then(parse_id) else {
            continue;
        };
        if !folder_dir.is_dir() {
            continue;
        }
        scan.last_folder = scan.last_folder.max(Some(folder));

        for batch_entry in fs::read_dir(&folder_dir)? {
            let batch_entry = batch_entry?;
            let batch_dir = batch_entry.path();
            if is_leftover(&batch_dir) {
                remove_leftover(&batch_dir)?;
                continue;
            }
            let Some(batch) = batch_entry.file_name().to_str().and_then(parse_id) else {
                continue;
            };
            if !batch_dir.is_dir() {
                continue;
            }
            scan.batches.push(scan_batch(folder, batch, batch_dir)?);
        }
    }

    scan.batches.sort_by_key(|b| b.batch);
    Ok(scan)
}

fn scan_batch(folder: u64, batch: u64, path: PathBuf) -> io::Result<ScannedBatch> {
    let mut positions = Vec::new();
    let mut closed = false;

    for entry in fs::read_dir(&path)? {
        let entry = entry?;
        let file = entry.path();
        if is_leftover(&file) {
            remove_leftover(&file)?;
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == MANIFEST_FILE {
            closed = true;
        } else if let Some(stem) = name.strip_suffix(".json") {
            if let Some(position) = parse_id(stem).and_then(|p| u32::try_from(p).ok()) {
                positions.push(position);
            }
        }
    }

    positions.sort_unstable();
    Ok(ScannedBatch {
        folder,
        batch,
        path,
        closed,
        positions,
    })
}

/// Removes a batch directory atomically
///
/// After the rename the batch is no longer visible to a scan, whatever
/// happens to the actual deletion.
pub async fn remove_batch(batch_dir: &Path) -> io::Result<()> {
    let mut trash_name = batch_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    trash_name.push(".");
    trash_name.push(TRASH_SUFFIX);
    let trash = batch_dir.with_file_name(trash_name);

    tokio::fs::rename(batch_dir, &trash).await?;
    if let Some(parent) = batch_dir.parent() {
        sync_dir(parent).await?;
    }
    tokio::fs::remove_dir_all(&trash).await
}

/// Creates a batch directory and makes it durable in its folder and root
pub async fn create_batch_dir(batch_dir: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(batch_dir).await?;
    if let Some(folder) = batch_dir.parent() {
        sync_dir(folder).await?;
        if let Some(root) = folder.parent() {
            sync_dir(root).await?;
        }
    }
    Ok(())
}

/// Removes a folder if it holds no batches
pub async fn remove_folder_if_empty(folder_dir: &Path) {
    // Fails harmlessly when the folder still has entries.
    if tokio::fs::remove_dir(folder_dir).await.is_ok() {
        tracing::debug!("Removed empty folder {}", folder_dir.display());
    }
}

/// Makes directory entry changes durable
pub async fn sync_dir(dir: &Path) -> io::Result<()> {
    // Directories cannot be opened for syncing on Windows.
    #[cfg(unix)]
    {
        tokio::fs::File::open(dir).await?.sync_all().await?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
