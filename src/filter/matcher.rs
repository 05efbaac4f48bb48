//! Text matchers used by filter rules and checksummers
//!
//! Three matching methods are supported:
//! 1. Basic: the text must equal the pattern
//! 2. Wildcard: `*` matches any run of characters, `?` matches one character
//! 3. Regex: a regular expression
//!
//! By default the whole text must match. With `partial` enabled a match
//! anywhere in the text is enough. A wildcard `*` also spans line breaks.

use crate::{ConfigError, ConfigResult};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// How a matcher interprets its pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    #[default]
    Basic,
    Wildcard,
    Regex,
}

/// A compiled text pattern
#[derive(Debug, Clone)]
pub struct TextMatcher {
    pattern: String,
    method: MatchMethod,
    ignore_case: bool,
    partial: bool,
    compiled: Option<Regex>,
}

impl TextMatcher {
    /// Compiles a matcher
    ///
    /// # Arguments
    ///
    /// * `pattern` - The pattern text
    /// * `method` - How to interpret the pattern
    /// * `ignore_case` - Whether matching is case-insensitive
    /// * `partial` - Whether a match anywhere in the text is enough
    ///
    /// # Returns
    ///
    /// * `Ok(TextMatcher)` - The compiled matcher
    /// * `Err(ConfigError::InvalidPattern)` - The pattern does not compile
    pub fn new(
        pattern: impl Into<String>,
        method: MatchMethod,
        ignore_case: bool,
        partial: bool,
    ) -> ConfigResult<Self> {
        let pattern = pattern.into();
        let compiled = match method {
            MatchMethod::Basic if !ignore_case && !partial => None,
            MatchMethod::Basic => Some(regex::escape(&pattern)),
            MatchMethod::Wildcard => Some(wildcard_to_regex(&pattern)),
            MatchMethod::Regex => Some(pattern.clone()),
        }
        .map(|source| {
            let source = if partial {
                source
            } else {
                format!("^(?:{})$", source)
            };
            RegexBuilder::new(&source)
                .case_insensitive(ignore_case)
                .dot_matches_new_line(method == MatchMethod::Wildcard)
                .build()
                .map_err(|e| {
                    ConfigError::InvalidPattern(format!("'{}' ({:?}): {}", pattern, method, e))
                })
        })
        .transpose()?;

        Ok(Self {
            pattern,
            method,
            ignore_case,
            partial,
            compiled,
        })
    }

    /// Exact, case-sensitive matcher. Never fails.
    pub fn basic(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            method: MatchMethod::Basic,
            ignore_case: false,
            partial: false,
            compiled: None,
        }
    }

    pub fn wildcard(pattern: impl Into<String>) -> ConfigResult<Self> {
        Self::new(pattern, MatchMethod::Wildcard, false, false)
    }

    pub fn regex(pattern: impl Into<String>) -> ConfigResult<Self> {
        Self::new(pattern, MatchMethod::Regex, false, false)
    }

    /// Checks whether the text matches this pattern
    pub fn matches(&self, text: &str) -> bool {
        match &self.compiled {
            Some(regex) => regex.is_match(text),
            None => text == self.pattern,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn method(&self) -> MatchMethod {
        self.method
    }

    pub fn is_ignore_case(&self) -> bool {
        self.ignore_case
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }
}

/// Converts a wildcard pattern to an (unanchored) regular expression
fn wildcard_to_regex(pattern: &str) -> String {
    let mut source = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source
}
