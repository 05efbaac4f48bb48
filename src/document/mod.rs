//! Document module: the unit of work flowing through the pipeline
//!
//! # Components
//!
//! - `DocState`: lifecycle state of a document within one pipeline run
//! - `Metadata`: ordered multi-valued fields attached to a document
//! - `DocumentRecord`: reference, metadata, optional content and checksums
//! - `FetchPhase`: whether only metadata or metadata plus content is known

mod doc_state;
mod metadata;
mod record;

// Re-export main types
pub use doc_state::DocState;
pub use metadata::Metadata;
pub use record::{Content, DocumentRecord, FetchPhase};
