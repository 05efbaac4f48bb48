//! Staged request and batch manifest formats
//!
//! Request files and manifests are JSON. Small content is stored inline as
//! hex; larger content is copied to a `.content` artifact next to the
//! request file. Both forms carry the length and CRC32 of the content so a
//! damaged staging area is detected before anything reaches the committer.

use crate::committer::CommitterRequest;
use crate::document::{Content, Metadata};
use crate::queue::layout::{self, sync_dir};
use crate::queue::{io_error, QueueError, QueueResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagedOperation {
    Upsert,
    Delete,
}

/// Where the content of a staged upsert lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StagedContent {
    Inline { hex: String, length: u64, crc32: u32 },
    Artifact { file: String, length: u64, crc32: u32 },
}

/// One request as written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StagedRequest {
    pub operation: StagedOperation,
    pub reference: String,
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<StagedContent>,

    /// Signature to store once the request is delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    pub staged_at: DateTime<Utc>,
}

/// Closing record of a batch
///
/// A batch without a manifest is still being written, or was interrupted
/// by a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatchManifest {
    pub batch_id: u64,
    pub folder_id: u64,

    /// Positions of the requests that belong to the batch, in order
    pub positions: Vec<u32>,

    pub closed_at: DateTime<Utc>,
}

impl BatchManifest {
    pub fn new(batch_id: u64, folder_id: u64, positions: Vec<u32>) -> Self {
        Self {
            batch_id,
            folder_id,
            positions,
            closed_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// A staged request read back for delivery
#[derive(Debug, Clone)]
pub struct LoadedRequest {
    pub request: CommitterRequest,
    pub signature: Option<String>,
}

/// Writes a file so that it is either absent or complete after a crash
pub async fn write_durable(path: &Path, bytes: &[u8]) -> QueueResult<()> {
    let tmp = layout::tmp_path(path);
    {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(io_error(&tmp))?;
        file.write_all(bytes).await.map_err(io_error(&tmp))?;
        file.sync_all().await.map_err(io_error(&tmp))?;
    }
    commit_tmp(&tmp, path).await
}

async fn commit_tmp(tmp: &Path, path: &Path) -> QueueResult<()> {
    tokio::fs::rename(tmp, path).await.map_err(io_error(path))?;
    if let Some(parent) = path.parent() {
        sync_dir(parent).await.map_err(io_error(parent))?;
    }
    Ok(())
}

/// Copies a reader into a durable artifact, returning length and CRC32
async fn copy_durable(
    mut reader: impl AsyncRead + Unpin,
    path: &Path,
    source: &Path,
) -> QueueResult<(u64, u32)> {
    let tmp = layout::tmp_path(path);
    let mut hasher = crc32fast::Hasher::new();
    let mut length = 0u64;
    {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(io_error(&tmp))?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer).await.map_err(io_error(source))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            file.write_all(&buffer[..read])
                .await
                .map_err(io_error(&tmp))?;
            length += read as u64;
        }
        file.sync_all().await.map_err(io_error(&tmp))?;
    }
    commit_tmp(&tmp, path).await?;
    Ok((length, hasher.finalize()))
}

async fn stage_content(
    batch_dir: &Path,
    position: u32,
    content: &Content,
    inline_limit: usize,
) -> QueueResult<StagedContent> {
    let file = layout::content_file_name(position);
    let artifact = batch_dir.join(&file);

    match content {
        Content::Bytes(bytes) if bytes.len() <= inline_limit => Ok(StagedContent::Inline {
            hex: hex::encode(bytes),
            length: bytes.len() as u64,
            crc32: crc32fast::hash(bytes),
        }),
        Content::Bytes(bytes) => {
            write_durable(&artifact, bytes).await?;
            Ok(StagedContent::Artifact {
                file,
                length: bytes.len() as u64,
                crc32: crc32fast::hash(bytes),
            })
        }
        Content::File(source) => {
            let size = tokio::fs::metadata(source)
                .await
                .map_err(io_error(source))?
                .len();
            if size <= inline_limit as u64 {
                let bytes = tokio::fs::read(source).await.map_err(io_error(source))?;
                return Ok(StagedContent::Inline {
                    hex: hex::encode(&bytes),
                    length: bytes.len() as u64,
                    crc32: crc32fast::hash(&bytes),
                });
            }
            let reader = tokio::fs::File::open(source)
                .await
                .map_err(io_error(source))?;
            let (length, crc32) = copy_durable(reader, &artifact, source).await?;
            Ok(StagedContent::Artifact {
                file,
                length,
                crc32,
            })
        }
    }
}

/// Stages one request at a position of a batch
///
/// The request file is written last, so a request is visible to recovery
/// only once its content is safely on disk.
pub async fn stage_request(
    batch_dir: &Path,
    position: u32,
    request: &CommitterRequest,
    signature: Option<&str>,
    inline_limit: usize,
) -> QueueResult<()> {
    let (operation, content) = match request {
        CommitterRequest::Upsert(upsert) => {
            let content = match &upsert.content {
                Some(content) => Some(stage_content(batch_dir, position, content, inline_limit).await?),
                None => None,
            };
            (StagedOperation::Upsert, content)
        }
        CommitterRequest::Delete(_) => (StagedOperation::Delete, None),
    };

    let staged = StagedRequest {
        operation,
        reference: request.reference().to_string(),
        metadata: request.metadata().clone(),
        content,
        signature: signature.map(str::to_string),
        staged_at: Utc::now(),
    };
    let json = serde_json::to_vec(&staged)?;
    write_durable(&layout::request_file(batch_dir, position), &json).await
}

fn corrupt(path: &Path, message: impl Into<String>) -> QueueError {
    QueueError::Corrupt {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn check_integrity(path: &Path, length: u64, crc32: u32, actual: (u64, u32)) -> QueueResult<()> {
    if actual.0 != length {
        return Err(corrupt(
            path,
            format!("expected {} bytes, found {}", length, actual.0),
        ));
    }
    if actual.1 != crc32 {
        return Err(corrupt(
            path,
            format!("checksum mismatch: expected {:08x}, found {:08x}", crc32, actual.1),
        ));
    }
    Ok(())
}

async fn verify_artifact(path: &Path, length: u64, crc32: u32) -> QueueResult<()> {
    let mut file = tokio::fs::File::open(path).await.map_err(io_error(path))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut total = 0u64;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(io_error(path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    check_integrity(path, length, crc32, (total, hasher.finalize()))
}

/// Reads a staged request file without touching its content
pub async fn read_staged(path: &Path) -> QueueResult<StagedRequest> {
    let bytes = tokio::fs::read(path).await.map_err(io_error(path))?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt(path, e.to_string()))
}

/// Loads a staged request for delivery, verifying its content
///
/// Artifact content is handed to the committer as a file reference; the
/// artifact stays on disk until the batch is acknowledged.
pub async fn load_request(batch_dir: &Path, position: u32) -> QueueResult<LoadedRequest> {
    let path = layout::request_file(batch_dir, position);
    let staged = read_staged(&path).await?;

    let content = match &staged.content {
        None => None,
        Some(StagedContent::Inline { hex, length, crc32 }) => {
            let bytes =
                hex::decode(hex).map_err(|e| corrupt(&path, format!("inline content: {}", e)))?;
            check_integrity(
                &path,
                *length,
                *crc32,
                (bytes.len() as u64, crc32fast::hash(&bytes)),
            )?;
            Some(Content::Bytes(bytes))
        }
        Some(StagedContent::Artifact {
            file,
            length,
            crc32,
        }) => {
            let artifact: PathBuf = batch_dir.join(file);
            verify_artifact(&artifact, *length, *crc32).await?;
            Some(Content::File(artifact))
        }
    };

    let request = match staged.operation {
        StagedOperation::Upsert => CommitterRequest::upsert(staged.reference, staged.metadata, content),
        StagedOperation::Delete => CommitterRequest::delete(staged.reference, staged.metadata),
    };

    Ok(LoadedRequest {
        request,
        signature: staged.signature,
    })
}

/// Writes the manifest that closes a batch
pub async fn write_manifest(batch_dir: &Path, manifest: &BatchManifest) -> QueueResult<()> {
    let json = serde_json::to_vec_pretty(manifest)?;
    write_durable(&layout::manifest_file(batch_dir), &json).await
}

pub async fn read_manifest(batch_dir: &Path) -> QueueResult<BatchManifest> {
    let path = layout::manifest_file(batch_dir);
    let bytes = tokio::fs::read(&path).await.map_err(io_error(&path))?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt(&path, e.to_string()))
}
