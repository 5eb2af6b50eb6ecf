//! Arbitrary per-item metadata.
//!
//! Metadata is a nested JSON object addressed with dotted paths
//! (`"crop.rect.x"`). Writes are diffed by deep equality so repeated
//! assignments of the same value do not produce change notifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A metadata write that actually changed something.
///
/// `key` is the root key of the written path and `value` the full value now
/// stored under it, so listeners can react per top-level entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataChange {
    pub key: String,
    pub value: Value,
    pub silent: bool,
}

/// Nested key-value metadata of an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the value stored at a dotted path.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::domain::Metadata;
    /// use serde_json::json;
    ///
    /// let mut metadata = Metadata::new();
    /// metadata.set("crop.rect.x", json!(10), false);
    /// assert_eq!(metadata.get("crop.rect.x"), Some(&json!(10)));
    /// assert_eq!(metadata.get("crop.missing"), None);
    /// ```
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut keys = path.split('.');
        let first = self.0.get(keys.next()?)?;
        keys.try_fold(first, |value, key| value.as_object()?.get(key))
    }

    /// Writes a value at a dotted path, creating intermediate objects.
    ///
    /// Intermediate values that are not objects are replaced by objects.
    /// Returns `None` when the stored value already equals `value`.
    pub fn set(&mut self, path: &str, value: Value, silent: bool) -> Option<MetadataChange> {
        let keys: Vec<&str> = path.split('.').filter(|k| !k.is_empty()).collect();
        let (last, parents) = keys.split_last()?;

        let mut target = &mut self.0;
        for key in parents {
            let entry = target
                .entry((*key).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            target = entry.as_object_mut()?;
        }

        if target.get(*last) == Some(&value) {
            return None;
        }
        target.insert((*last).to_string(), value);

        let root = keys[0].to_string();
        Some(MetadataChange {
            value: self.0.get(&root).cloned().unwrap_or(Value::Null),
            key: root,
            silent,
        })
    }

    /// The whole metadata object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Metadata as a JSON value, as sent alongside an upload.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Returns whether no keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_reports_root_key_and_value() {
        let mut metadata = Metadata::new();
        let change = metadata.set("crop.rect.x", json!(4), false).expect("changed");
        assert_eq!(change.key, "crop");
        assert_eq!(change.value, json!({"rect": {"x": 4}}));
        assert!(!change.silent);
    }

    #[test]
    fn deep_equal_values_are_not_changes() {
        let mut metadata = Metadata::new();
        metadata.set("tags", json!(["a", "b"]), false);
        assert!(metadata.set("tags", json!(["a", "b"]), false).is_none());
        assert!(metadata.set("tags", json!(["b", "a"]), true).is_some());
    }

    #[test]
    fn scalar_parents_are_replaced() {
        let mut metadata = Metadata::new();
        metadata.set("size", json!(3), false);
        metadata.set("size.width", json!(10), false);
        assert_eq!(metadata.get("size"), Some(&json!({"width": 10})));
    }

    #[test]
    fn empty_path_is_ignored() {
        let mut metadata = Metadata::new();
        assert!(metadata.set("", json!(1), false).is_none());
        assert!(metadata.is_empty());
    }
}
