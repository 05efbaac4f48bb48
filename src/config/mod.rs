//! Configuration module for Sumi-Sift
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_sift::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sift.toml")).unwrap();
//! println!("Staging batches under: {}", config.queue.directory);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ChecksumSettings, CommitterSettings, Config, FilterRuleConfig, MatcherConfig, PipelineSettings,
    QueueSettings,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
