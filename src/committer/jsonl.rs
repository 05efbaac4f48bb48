//! JSON-lines committer
//!
//! Appends one JSON object per delivered request to a file, or to standard
//! output when no file is configured. Content is written as UTF-8 text,
//! replacing invalid sequences. A batch is reported delivered only once its
//! lines are flushed, and synced to disk when writing to a file.

use crate::committer::{
    Committer, CommitterError, CommitterRequest, CommitterResult, DeleteRequest, UpsertRequest,
};
use crate::config::CommitterSettings;
use crate::document::Metadata;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct OutputLine<'a> {
    operation: &'static str,
    reference: &'a str,
    metadata: &'a Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

enum Output {
    File(tokio::fs::File),
    Stdout(tokio::io::Stdout),
}

impl Output {
    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Output::File(file) => file.write_all(bytes).await,
            Output::Stdout(stdout) => stdout.write_all(bytes).await,
        }
    }

    /// Pushes buffered lines out, and to stable storage for a file
    async fn persist(&mut self) -> std::io::Result<()> {
        match self {
            Output::File(file) => {
                file.flush().await?;
                file.sync_data().await
            }
            Output::Stdout(stdout) => stdout.flush().await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Output::File(file) => file.shutdown().await,
            Output::Stdout(stdout) => stdout.shutdown().await,
        }
    }
}

/// Committer writing requests as JSON lines
pub struct JsonLinesCommitter {
    path: Option<PathBuf>,
    ignore_content: bool,
    writer: Option<Output>,
    written: u64,
}

impl JsonLinesCommitter {
    /// Creates a committer for a file, or standard output if `path` is `None`
    pub fn new(path: Option<PathBuf>, ignore_content: bool) -> Self {
        Self {
            path,
            ignore_content,
            writer: None,
            written: 0,
        }
    }

    pub fn from_settings(settings: &CommitterSettings) -> Self {
        Self::new(settings.output.as_ref().map(PathBuf::from), settings.ignore_content)
    }

    /// Number of lines written since init
    pub fn written(&self) -> u64 {
        self.written
    }

    async fn write_line(&mut self, line: &OutputLine<'_>) -> CommitterResult<()> {
        let mut bytes = serde_json::to_vec(line)
            .map_err(|e| CommitterError::Rejected {
                reference: line.reference.to_string(),
                message: e.to_string(),
            })?;
        bytes.push(b'\n');

        self.output()?.write_all(&bytes).await?;
        self.written += 1;
        Ok(())
    }

    fn output(&mut self) -> CommitterResult<&mut Output> {
        self.writer
            .as_mut()
            .ok_or_else(|| CommitterError::Unavailable("committer not initialized".to_string()))
    }
}

#[async_trait]
impl Committer for JsonLinesCommitter {
    async fn init(&mut self) -> CommitterResult<()> {
        let writer = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        CommitterError::Init(format!("{}: {}", parent.display(), e))
                    })?;
                }
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| CommitterError::Init(format!("{}: {}", path.display(), e)))?;
                Output::File(file)
            }
            None => Output::Stdout(tokio::io::stdout()),
        };
        self.writer = Some(writer);
        self.written = 0;
        Ok(())
    }

    async fn upsert(&mut self, request: &UpsertRequest) -> CommitterResult<()> {
        let content = match (&request.content, self.ignore_content) {
            (Some(content), false) => {
                let bytes = content.read_async().await?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => None,
        };
        self.write_line(&OutputLine {
            operation: "upsert",
            reference: &request.reference,
            metadata: &request.metadata,
            content,
        })
        .await
    }

    async fn delete(&mut self, request: &DeleteRequest) -> CommitterResult<()> {
        self.write_line(&OutputLine {
            operation: "delete",
            reference: &request.reference,
            metadata: &request.metadata,
            content: None,
        })
        .await
    }

    async fn commit_batch(&mut self, requests: &[CommitterRequest]) -> CommitterResult<()> {
        for request in requests {
            match request {
                CommitterRequest::Upsert(upsert) => self.upsert(upsert).await?,
                CommitterRequest::Delete(delete) => self.delete(delete).await?,
            }
        }
        self.output()?.persist().await?;
        Ok(())
    }

    async fn close(&mut self) -> CommitterResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.persist().await?;
            writer.shutdown().await?;
        }
        tracing::info!("JSON-lines committer closed after {} requests", self.written);
        Ok(())
    }

    async fn clean(&mut self) -> CommitterResult<()> {
        // Standard output cannot be taken back.
        if let Some(path) = &self.path {
            if path.exists() {
                tokio::fs::write(path, b"").await?;
            }
        }
        self.written = 0;
        Ok(())
    }
}
