//! Path keyword matching for the async and sync interception lists.
//!
//! Keyword lists arrive in three shapes: a native list (JSON routing file),
//! a string holding a JSON array literal, or a comma-separated string. All
//! three normalize into one [`KeywordSet`] of trimmed, lower-cased keywords.
//! A path matches when its lower-cased form contains any keyword as a
//! substring.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Raw keyword configuration before normalization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum KeywordSource {
    /// Native list, e.g. `["login", "/api/pay"]` in a routing file.
    List(Vec<Value>),

    /// String form: either a JSON array literal or comma-separated values.
    Text(String),
}

impl From<&str> for KeywordSource {
    fn from(text: &str) -> Self {
        KeywordSource::Text(text.to_string())
    }
}

impl From<Vec<String>> for KeywordSource {
    fn from(items: Vec<String>) -> Self {
        KeywordSource::List(items.into_iter().map(Value::String).collect())
    }
}

/// Canonical set of lower-cased, non-empty keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet(BTreeSet<String>);

impl KeywordSet {
    /// Normalize any keyword source into a set.
    pub fn from_source(source: &KeywordSource) -> Self {
        let items: Vec<String> = match source {
            KeywordSource::List(values) => values.iter().map(value_text).collect(),
            KeywordSource::Text(text) => split_text(text),
        };

        Self(
            items
                .iter()
                .map(|item| item.trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect(),
        )
    }

    /// Normalize a string source (JSON array literal or CSV).
    pub fn parse(text: &str) -> Self {
        Self::from_source(&KeywordSource::Text(text.to_string()))
    }

    /// Returns `true` if the lower-cased path contains any keyword.
    pub fn matches(&self, path: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }
        let path = path.to_lowercase();
        self.0.iter().any(|keyword| path.contains(keyword.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

fn split_text(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Array(values)) => return values.iter().map(value_text).collect(),
            Ok(_) => return vec![trimmed.to_string()],
            Err(_) => {}
        }
    }
    trimmed.split(',').map(str::to_string).collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
