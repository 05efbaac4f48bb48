//! Pipeline module for document evaluation
//!
//! This module contains the evaluation logic, including:
//! - Stage variants (metadata filter, content filter, checksum)
//! - Explicit continue/stop outcomes instead of exception-style control flow
//! - The runner that applies stages in order and settles the final state

mod context;
mod runner;
mod stage;

pub use context::PipelineContext;
pub use runner::Pipeline;
pub use stage::{Flow, Stage, StageOutcome};
