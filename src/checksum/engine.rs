//! Document signatures and change classification
//!
//! A signature is a SHA-256 digest, hex encoded, over either selected
//! metadata fields or the raw content bytes.

use crate::checksum::store::{ChecksumStore, StoreResult};
use crate::config::ChecksumSettings;
use crate::document::{DocState, DocumentRecord};
use crate::filter::TextMatcher;
use crate::{ConfigError, ConfigResult, StageError};
use sha2::{Digest, Sha256};

/// Field checked when a metadata checksummer names no field
pub const DEFAULT_FIELD: &str = "Last-Modified";

// Separators keep ("ab", "c") and ("a", "bc") from hashing alike.
const FIELD_SEP: u8 = 0x1f;
const VALUE_SEP: u8 = 0x1e;
const ENTRY_SEP: u8 = 0x1d;

/// How a document signature is computed
#[derive(Debug, Clone)]
pub enum Checksummer {
    /// Digest over the values of every field whose name matches
    Metadata { fields: TextMatcher },

    /// Digest over the raw content bytes
    Content,
}

/// Result of comparing a fresh signature with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    New,
    Modified,
    Unmodified,
}

impl From<ChangeClass> for DocState {
    fn from(class: ChangeClass) -> Self {
        match class {
            ChangeClass::New => DocState::New,
            ChangeClass::Modified => DocState::Modified,
            ChangeClass::Unmodified => DocState::Unmodified,
        }
    }
}

impl Checksummer {
    pub fn metadata(fields: TextMatcher) -> Self {
        Self::Metadata { fields }
    }

    pub fn content() -> Self {
        Self::Content
    }

    /// Builds a checksummer from configuration
    ///
    /// `field` and `use-content` are mutually exclusive. With neither set,
    /// the `Last-Modified` field is used.
    pub fn from_config(settings: &ChecksumSettings) -> ConfigResult<Self> {
        match (&settings.field, settings.use_content) {
            (Some(_), true) => Err(ConfigError::Validation(
                "checksum 'field' and 'use-content' are mutually exclusive".to_string(),
            )),
            (None, true) => Ok(Self::Content),
            (Some(field), false) => Ok(Self::metadata(field.compile()?)),
            (None, false) => Ok(Self::metadata(TextMatcher::basic(DEFAULT_FIELD))),
        }
    }

    /// Returns true if this checksummer reads the document content
    pub fn requires_content(&self) -> bool {
        matches!(self, Self::Content)
    }

    /// Computes the signature of a record
    ///
    /// # Returns
    ///
    /// * `Ok(Some(signature))` - Hex-encoded SHA-256 digest
    /// * `Ok(None)` - No field matched, so change cannot be detected
    /// * `Err(StageError)` - Content is missing or unreadable
    pub fn compute(&self, record: &DocumentRecord) -> Result<Option<String>, StageError> {
        match self {
            Self::Metadata { fields } => {
                let mut hasher = Sha256::new();
                let mut matched = false;
                for (name, values) in record.metadata.iter().filter(|(n, _)| fields.matches(n)) {
                    matched = true;
                    hasher.update(name.as_bytes());
                    hasher.update([FIELD_SEP]);
                    for value in values {
                        hasher.update(value.as_bytes());
                        hasher.update([VALUE_SEP]);
                    }
                    hasher.update([ENTRY_SEP]);
                }
                Ok(matched.then(|| hex::encode(hasher.finalize())))
            }
            Self::Content => {
                let content =
                    record
                        .read_content()?
                        .ok_or_else(|| StageError::MissingContent {
                            reference: record.reference.clone(),
                        })?;
                Ok(Some(hex::encode(Sha256::digest(&content))))
            }
        }
    }
}

/// Compares a signature against the store without modifying it
///
/// A missing signature can never be compared, so it always classifies as new.
///
/// # Returns
///
/// The change class and the previously stored signature, if any
pub fn classify(
    store: &dyn ChecksumStore,
    reference: &str,
    signature: Option<&str>,
) -> StoreResult<(ChangeClass, Option<String>)> {
    let prior = store.get(reference)?;
    let class = match (prior.as_deref(), signature) {
        (None, _) | (_, None) => ChangeClass::New,
        (Some(old), Some(new)) if old == new => ChangeClass::Unmodified,
        (Some(_), Some(_)) => ChangeClass::Modified,
    };
    Ok((class, prior))
}
