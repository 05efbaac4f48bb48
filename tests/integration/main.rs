//! Integration tests for the pipeline, commit queue and coordinator
//!
//! These tests drive the public API end to end against a temporary staging
//! directory and an in-memory or deliberately failing committer.

mod common;
mod coordinator_tests;
mod pipeline_tests;
mod queue_tests;
