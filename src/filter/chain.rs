//! Ordered filter chains
//!
//! Rules are evaluated in configured order and the first matching rule
//! decides. Later rules are never consulted once one matched.

use crate::config::FilterRuleConfig;
use crate::document::DocumentRecord;
use crate::filter::TextMatcher;
use crate::{ConfigError, ConfigResult, StageError};
use serde::Deserialize;

/// What a matching rule does with the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMatch {
    Include,
    Exclude,
}

/// Outcome of a filter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Decision applied when no rule of a chain matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoMatchPolicy {
    #[default]
    Accept,
    Reject,
}

impl From<NoMatchPolicy> for Decision {
    fn from(policy: NoMatchPolicy) -> Self {
        match policy {
            NoMatchPolicy::Accept => Decision::Accept,
            NoMatchPolicy::Reject => Decision::Reject,
        }
    }
}

impl From<OnMatch> for Decision {
    fn from(on_match: OnMatch) -> Self {
        match on_match {
            OnMatch::Include => Decision::Accept,
            OnMatch::Exclude => Decision::Reject,
        }
    }
}

/// A single include/exclude rule
///
/// With a field matcher the rule tests every value of every field whose name
/// matches. Without one the rule tests the document content as text.
#[derive(Debug, Clone)]
pub struct FilterRule {
    field: Option<TextMatcher>,
    value: TextMatcher,
    on_match: OnMatch,
}

impl FilterRule {
    /// Creates a rule over metadata fields
    pub fn on_field(field: TextMatcher, value: TextMatcher, on_match: OnMatch) -> Self {
        Self {
            field: Some(field),
            value,
            on_match,
        }
    }

    /// Creates a rule over the document content
    pub fn on_content(value: TextMatcher, on_match: OnMatch) -> Self {
        Self {
            field: None,
            value,
            on_match,
        }
    }

    /// Compiles a rule from its configuration
    ///
    /// Content rules match anywhere in the text unless `partial = false`
    /// is set explicitly.
    pub fn from_config(config: &FilterRuleConfig) -> ConfigResult<Self> {
        let value = config.value.compile_or(config.field.is_none())?;
        Ok(match &config.field {
            Some(field) => Self::on_field(field.compile()?, value, config.on_match),
            None => Self::on_content(value, config.on_match),
        })
    }

    pub fn targets_content(&self) -> bool {
        self.field.is_none()
    }

    pub fn on_match(&self) -> OnMatch {
        self.on_match
    }

    fn matches(&self, record: &DocumentRecord, content: Option<&str>) -> bool {
        match &self.field {
            Some(field) => record
                .metadata
                .iter()
                .filter(|(name, _)| field.matches(name))
                .any(|(_, values)| values.iter().any(|v| self.value.matches(v))),
            None => content.map_or(false, |text| self.value.matches(text)),
        }
    }
}

/// An ordered list of rules plus the decision applied when none matches
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    rules: Vec<FilterRule>,
    no_match: NoMatchPolicy,
}

impl FilterChain {
    pub fn new(rules: Vec<FilterRule>, no_match: NoMatchPolicy) -> Self {
        Self { rules, no_match }
    }

    /// Compiles a chain from configuration
    ///
    /// # Arguments
    ///
    /// * `rules` - Rule configurations, in evaluation order
    /// * `no_match` - Decision when no rule matches
    /// * `allow_content` - Whether rules without a field are allowed
    pub fn from_config(
        rules: &[FilterRuleConfig],
        no_match: NoMatchPolicy,
        allow_content: bool,
    ) -> ConfigResult<Self> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, config)| {
                if config.field.is_none() && !allow_content {
                    return Err(ConfigError::Validation(format!(
                        "metadata filter #{} must name a field",
                        index + 1
                    )));
                }
                FilterRule::from_config(config)
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self::new(rules, no_match))
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn no_match(&self) -> NoMatchPolicy {
        self.no_match
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns true if any rule needs the document content
    pub fn needs_content(&self) -> bool {
        self.rules.iter().any(FilterRule::targets_content)
    }

    /// Finds the first rule matching the record
    ///
    /// Content is only read when a content rule is reached. Content rules
    /// never match a record without content.
    pub fn first_match(
        &self,
        record: &DocumentRecord,
    ) -> Result<Option<(usize, &FilterRule)>, StageError> {
        let mut text: Option<Option<String>> = None;
        for (index, rule) in self.rules.iter().enumerate() {
            let content = if rule.targets_content() {
                if text.is_none() {
                    text = Some(
                        record
                            .read_content()?
                            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
                    );
                }
                text.as_ref().and_then(|t| t.as_deref())
            } else {
                None
            };
            if rule.matches(record, content) {
                return Ok(Some((index, rule)));
            }
        }
        Ok(None)
    }

    /// Evaluates the chain against a record
    pub fn evaluate(&self, record: &DocumentRecord) -> Result<Decision, StageError> {
        Ok(match self.first_match(record)? {
            Some((_, rule)) => rule.on_match.into(),
            None => self.no_match.into(),
        })
    }
}
