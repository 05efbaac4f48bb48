//! Filter module for accepting or rejecting documents
//!
//! This module handles:
//! - Compiling text patterns (basic, wildcard, regex)
//! - Ordered include/exclude rules over metadata fields or content
//! - First-match evaluation with an explicit no-match policy

mod chain;
mod matcher;

pub use chain::{Decision, FilterChain, FilterRule, NoMatchPolicy, OnMatch};
pub use matcher::{MatchMethod, TextMatcher};
