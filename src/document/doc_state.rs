/// Document state definitions for tracking evaluation outcomes
///
/// This module defines all possible states a document can end up in after
/// its pipeline run.
use std::fmt;

/// Represents the outcome of evaluating a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocState {
    // ===== Accepting States =====
    /// Document was never seen before (no stored signature)
    New,

    /// Document signature differs from the stored one
    Modified,

    // ===== Terminal Skip States =====
    /// Document signature equals the stored one; nothing to commit
    Unmodified,

    /// A filter rule (or the no-match default) rejected the document
    Rejected,

    // ===== Terminal Error States =====
    /// A stage could not evaluate the document
    Error,

    // ===== Special States =====
    /// Document disappeared upstream; always propagated as a delete
    Deleted,
}

impl DocState {
    /// Returns true if the document leads to an upsert request
    pub fn is_accepting(&self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }

    /// Returns true if the state can never be turned back into an accepting one
    pub fn is_rejecting(&self) -> bool {
        matches!(self, Self::Rejected | Self::Error)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns true if the document produces a committer request
    pub fn needs_commit(&self) -> bool {
        matches!(self, Self::New | Self::Modified | Self::Deleted)
    }

    /// Short lowercase label used in logs and statistics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Unmodified => "unmodified",
            Self::Rejected => "rejected",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }

    /// Parses a state label
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "modified" => Some(Self::Modified),
            "unmodified" => Some(Self::Unmodified),
            "rejected" => Some(Self::Rejected),
            "error" => Some(Self::Error),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Returns all possible document states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::New,
            Self::Modified,
            Self::Unmodified,
            Self::Rejected,
            Self::Error,
            Self::Deleted,
        ]
    }
}

impl fmt::Display for DocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
