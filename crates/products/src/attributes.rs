use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stockline_core::{DomainError, DomainResult, ValueObject};

/// Unordered key/value attributes of a variant (e.g. `size=M`, `color=red`).
///
/// Keys are kept sorted so two sets with the same pairs compare equal and
/// serialise identically regardless of input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(BTreeMap<String, String>);

impl ValueObject for AttributeSet {}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Build from a JSON object. `null` is the empty set; strings are taken
    /// verbatim, other scalars by their JSON text.
    pub fn from_json(value: &Value) -> DomainResult<AttributeSet> {
        match value {
            Value::Null => Ok(AttributeSet::new()),
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let key = k.trim();
                    if key.is_empty() {
                        return Err(DomainError::validation("attribute name cannot be empty"));
                    }
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        Value::Null => continue,
                        other => other.to_string(),
                    };
                    out.insert(key.to_string(), rendered);
                }
                Ok(AttributeSet(out))
            }
            other => Err(DomainError::validation(format!(
                "attributes must be an object, got {other}"
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        AttributeSet(iter.into_iter().collect())
    }
}
