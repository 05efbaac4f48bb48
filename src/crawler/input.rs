//! Fetched-document input
//!
//! The command line tool reads fetched documents as JSON lines, one object
//! per document:
//!
//! ```json
//! {"reference": "https://example.com/", "metadata": {"Content-Type": ["text/html"]}, "content": "<html>..."}
//! {"reference": "https://example.com/big.pdf", "content-file": "/spool/big.pdf"}
//! {"reference": "https://example.com/gone", "deleted": true}
//! ```

use crate::document::{Content, DocumentRecord, Metadata};
use serde::Deserialize;
use std::io::BufRead;
use std::path::PathBuf;

/// One fetched document as read from input
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DocumentInput {
    pub reference: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Inline text content
    #[serde(default)]
    pub content: Option<String>,

    /// Content spooled to a file by the fetcher
    #[serde(default)]
    pub content_file: Option<PathBuf>,

    #[serde(default)]
    pub deleted: bool,
}

impl DocumentInput {
    pub fn into_record(self) -> DocumentRecord {
        if self.deleted {
            return DocumentRecord::deleted(self.reference, self.metadata);
        }

        let mut record = DocumentRecord::new(self.reference).with_metadata(self.metadata);
        record.content = match (self.content, self.content_file) {
            (Some(text), _) => Some(Content::Bytes(text.into_bytes())),
            (None, Some(path)) => Some(Content::File(path)),
            (None, None) => None,
        };
        record
    }
}

/// Reads JSON-lines documents, skipping blank lines
///
/// # Returns
///
/// * `Ok(Vec<DocumentRecord>)` - Records in input order
/// * `Err(String)` - The first unreadable line, with its line number
pub fn read_documents(reader: impl BufRead) -> Result<Vec<DocumentRecord>, String> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("line {}: {}", index + 1, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let input: DocumentInput =
            serde_json::from_str(&line).map_err(|e| format!("line {}: {}", index + 1, e))?;
        records.push(input.into_record());
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocState;

    #[test]
    fn test_read_documents() {
        let input = r#"
{"reference": "a", "metadata": {"Content-Type": ["text/html"]}, "content": "hello"}

{"reference": "b", "content-file": "/spool/b.bin"}
{"reference": "c", "deleted": true}
"#;
        let records = read_documents(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].metadata.first("Content-Type"), Some("text/html"));
        assert_eq!(records[0].content, Some(Content::Bytes(b"hello".to_vec())));
        assert_eq!(records[1].content, Some(Content::File(PathBuf::from("/spool/b.bin"))));
        assert_eq!(records[2].state(), Some(DocState::Deleted));
    }

    #[test]
    fn test_bad_line_is_reported() {
        let input = "{\"reference\": \"a\"}\n{\"metadata\": {}}\n";
        let error = read_documents(input.as_bytes()).unwrap_err();
        assert!(error.starts_with("line 2:"));
    }
}
