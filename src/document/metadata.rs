//! Multi-valued document metadata
//!
//! Fields are kept sorted by name so that anything derived from metadata
//! (signatures, staged request files) is reproducible across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered mapping of field name to one or more string values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    fields: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    /// Creates empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value to a field, creating the field if needed
    pub fn add(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(value.into());
    }

    /// Replaces all values of a field
    pub fn set(&mut self, field: impl Into<String>, values: Vec<String>) {
        self.fields.insert(field.into(), values);
    }

    /// Builder-style variant of [`Metadata::add`]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(field, value);
        self
    }

    /// Removes a field, returning its values
    pub fn remove(&mut self, field: &str) -> Option<Vec<String>> {
        self.fields.remove(field)
    }

    /// Gets all values of a field
    pub fn values(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Gets the first value of a field
    pub fn first(&self, field: &str) -> Option<&str> {
        self.values(field).first().map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterates over fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Keeps only the fields whose name satisfies the predicate
    pub fn retain_fields(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.fields.retain(|name, _| keep(name));
    }

    /// Number of distinct fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (field, value) in iter {
            metadata.add(field, value);
        }
        metadata
    }
}
