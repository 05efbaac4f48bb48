//! Committer module
//!
//! Requests produced by the pipeline and the sink interface that receives
//! them once the commit queue flushes a batch.

mod jsonl;
mod memory;
mod request;
mod traits;

pub use jsonl::JsonLinesCommitter;
pub use memory::MemoryCommitter;
pub use request::{CommitterRequest, DeleteRequest, UpsertRequest};
pub use traits::{Committer, CommitterError, CommitterResult};
