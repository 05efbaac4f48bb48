use crate::document::{Content, Metadata};

/// Add or replace a document downstream
#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub reference: String,
    pub metadata: Metadata,
    pub content: Option<Content>,
}

/// Remove a document downstream
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub reference: String,
    pub metadata: Metadata,
}

/// A unit of work handed to a committer
#[derive(Debug, Clone)]
pub enum CommitterRequest {
    Upsert(UpsertRequest),
    Delete(DeleteRequest),
}

impl CommitterRequest {
    pub fn upsert(
        reference: impl Into<String>,
        metadata: Metadata,
        content: Option<Content>,
    ) -> Self {
        Self::Upsert(UpsertRequest {
            reference: reference.into(),
            metadata,
            content,
        })
    }

    pub fn delete(reference: impl Into<String>, metadata: Metadata) -> Self {
        Self::Delete(DeleteRequest {
            reference: reference.into(),
            metadata,
        })
    }

    pub fn reference(&self) -> &str {
        match self {
            Self::Upsert(r) => &r.reference,
            Self::Delete(r) => &r.reference,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::Upsert(r) => &r.metadata,
            Self::Delete(r) => &r.metadata,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }

    /// Short label used in logs and staged files
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Delete(_) => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let metadata: Metadata = [("title", "Hello")].into_iter().collect();
        let upsert = CommitterRequest::upsert("a", metadata.clone(), Some("body".into()));
        let delete = CommitterRequest::delete("b", Metadata::new());

        assert_eq!(upsert.reference(), "a");
        assert_eq!(upsert.metadata().first("title"), Some("Hello"));
        assert_eq!(upsert.operation(), "upsert");
        assert!(!upsert.is_delete());

        assert_eq!(delete.reference(), "b");
        assert!(delete.metadata().is_empty());
        assert!(delete.is_delete());
    }
}
