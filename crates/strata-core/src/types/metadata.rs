//! Entry and state metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key/value metadata plus the operation that produced the record.
///
/// Properties are kept in a `BTreeMap` so the serialized form is stable and
/// round-trips byte-identically through storage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Free-form properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Operation tag, e.g. `"open"` or `"deposit"`.
    #[serde(default)]
    pub operation: String,
}

impl Metadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata carrying only an operation tag.
    pub fn with_operation(operation: impl Into<String>) -> Self {
        Self {
            properties: BTreeMap::new(),
            operation: operation.into(),
        }
    }

    /// Builder-style property insert.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Whether there are neither properties nor an operation tag.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.operation.is_empty()
    }
}
