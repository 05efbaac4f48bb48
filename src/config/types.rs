use crate::filter::{MatchMethod, NoMatchPolicy, OnMatch, TextMatcher};
use crate::ConfigResult;
use serde::Deserialize;

/// Main configuration structure for Sumi-Sift
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Rules evaluated against metadata, in order
    #[serde(default, rename = "metadata-filter")]
    pub metadata_filters: Vec<FilterRuleConfig>,

    /// Rules evaluated once content is available, in order
    #[serde(default, rename = "content-filter")]
    pub content_filters: Vec<FilterRuleConfig>,

    /// Change detection; absent means every accepted document is new
    pub checksum: Option<ChecksumSettings>,

    pub queue: QueueSettings,

    #[serde(default)]
    pub committer: CommitterSettings,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineSettings {
    /// Decision applied when no filter rule matches
    #[serde(default)]
    pub on_no_match: NoMatchPolicy,

    /// Documents evaluated concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            on_no_match: NoMatchPolicy::default(),
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    8
}

/// Settings of the JSON-lines committer used by the command line tool
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitterSettings {
    /// File receiving committed requests; standard output when absent
    pub output: Option<String>,

    /// Leave document content out of the output
    #[serde(default)]
    pub ignore_content: bool,
}

/// A text pattern as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MatcherConfig {
    pub pattern: String,

    #[serde(default)]
    pub method: MatchMethod,

    #[serde(default)]
    pub ignore_case: bool,

    /// Match anywhere in the text instead of the whole text
    ///
    /// Unset means whole-text matching for field names and values, and
    /// matching anywhere for document content.
    #[serde(default)]
    pub partial: Option<bool>,
}

impl MatcherConfig {
    /// Compiles the pattern, matching the whole text unless `partial` is set
    pub fn compile(&self) -> ConfigResult<TextMatcher> {
        self.compile_or(false)
    }

    /// Compiles the pattern, using `partial` when the flag is not set
    pub fn compile_or(&self, partial: bool) -> ConfigResult<TextMatcher> {
        TextMatcher::new(
            &self.pattern,
            self.method,
            self.ignore_case,
            self.partial.unwrap_or(partial),
        )
    }
}

/// A single filter rule
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilterRuleConfig {
    /// Field name pattern; absent means the rule targets content
    pub field: Option<MatcherConfig>,

    pub value: MatcherConfig,

    pub on_match: OnMatch,
}

/// Change detection configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChecksumSettings {
    /// Path to the SQLite checksum database; in-memory when absent
    pub database_path: Option<String>,

    /// Fields whose values make up the signature
    pub field: Option<MatcherConfig>,

    /// Use a digest of the content instead of metadata fields
    #[serde(default)]
    pub use_content: bool,
}

/// Commit queue configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueSettings {
    /// Root of the staging directory tree
    pub directory: String,

    /// Requests per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches per folder before a new folder is opened
    #[serde(default = "default_max_per_folder")]
    pub max_per_folder: usize,

    /// Closed but unflushed batches allowed before submitters block
    #[serde(default = "default_max_pending_batches")]
    pub max_pending_batches: usize,

    /// Interval after which a partial batch is closed and flushed (milliseconds)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Committer retries before flushing halts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay, doubled on each attempt (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound for the retry delay (milliseconds)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Content up to this many bytes is stored inside the request file
    #[serde(default = "default_inline_content_limit")]
    pub inline_content_limit: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_max_per_folder() -> usize {
    500
}

fn default_max_pending_batches() -> usize {
    64
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_inline_content_limit() -> usize {
    4_096
}
