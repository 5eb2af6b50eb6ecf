//! Pond options, labels and dynamic option access.
//!
//! [`Options`] is a plain serde struct with a default for every field, so it
//! can be embedded in a TOML config or built in code. Options can also be
//! read and written by name ([`Options::query`], [`Options::assign`]), with
//! string values coerced to the field's type the way HTML attributes would
//! be.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{FiledropError, Result};
use crate::domain::StatusLabel;
use crate::transport::ServerConfig;

/// Where new items go when no index is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertLocation {
    /// Prepend.
    #[default]
    Before,
    /// Append.
    After,
}

/// Human-readable status strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Labels {
    pub file_load_error: String,
    pub file_processing_error: String,
    pub file_processing_revert_error: String,
    pub file_remove_error: String,
    pub tap_to_cancel: String,
    pub tap_to_retry: String,
    pub tap_to_undo: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            file_load_error: "Error during load".into(),
            file_processing_error: "Error during upload".into(),
            file_processing_revert_error: "Error during revert".into(),
            file_remove_error: "Error during remove".into(),
            tap_to_cancel: "tap to cancel".into(),
            tap_to_retry: "tap to retry".into(),
            tap_to_undo: "tap to undo".into(),
        }
    }
}

impl Labels {
    /// A load failed; retrying may help.
    #[must_use]
    pub fn load_error(&self) -> StatusLabel {
        StatusLabel::new(self.file_load_error.clone(), self.tap_to_retry.clone())
    }

    /// The server refused the source, e.g. a 404 on fetch.
    #[must_use]
    pub fn load_refused(&self, code: u16, body: &str) -> StatusLabel {
        StatusLabel::new(self.file_load_error.clone(), format!("{code} ({body})"))
    }

    /// The file itself was refused; only removing it helps.
    #[must_use]
    pub fn invalid(&self, body: &str) -> StatusLabel {
        StatusLabel::new(or_default(body, &self.file_load_error), self.tap_to_cancel.clone())
    }

    #[must_use]
    pub fn processing_error(&self, body: &str) -> StatusLabel {
        StatusLabel::new(or_default(body, &self.file_processing_error), self.tap_to_retry.clone())
    }

    #[must_use]
    pub fn revert_error(&self, body: &str) -> StatusLabel {
        StatusLabel::new(or_default(body, &self.file_processing_revert_error), self.tap_to_retry.clone())
    }

    #[must_use]
    pub fn remove_error(&self, body: &str) -> StatusLabel {
        StatusLabel::new(or_default(body, &self.file_remove_error), self.tap_to_retry.clone())
    }
}

fn or_default(body: &str, fallback: &str) -> String {
    if body.trim().is_empty() {
        fallback.to_string()
    } else {
        body.to_string()
    }
}

/// Configuration of one pond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Form field name uploads are sent under.
    pub name: String,
    pub allow_multiple: bool,
    /// In single mode, replace the current file instead of refusing.
    pub allow_replace: bool,
    pub allow_revert: bool,
    /// Block dependent actions when a revert fails.
    pub force_revert: bool,
    /// Ceiling on active items; `None` means unlimited.
    pub max_files: Option<usize>,
    pub max_parallel_uploads: usize,
    pub instant_upload: bool,
    /// Keep uploads visibly in progress for at least 750–1500 ms.
    pub allow_minimum_upload_duration: bool,
    pub item_insert_location: InsertLocation,
    /// Honor explicit insert indices.
    pub item_insert_location_freedom: bool,
    /// File names (case-insensitive) that are silently skipped.
    pub ignored_files: Vec<String>,
    pub server: Option<ServerConfig>,
    /// Origin of the embedding page; remote URLs on other origins go through
    /// the fetch endpoint.
    pub origin: Option<String>,
    pub labels: Labels,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: "filedrop".into(),
            allow_multiple: false,
            allow_replace: true,
            allow_revert: true,
            force_revert: false,
            max_files: None,
            max_parallel_uploads: 2,
            instant_upload: true,
            allow_minimum_upload_duration: true,
            item_insert_location: InsertLocation::Before,
            item_insert_location_freedom: true,
            ignored_files: vec![".ds_store".into(), "thumbs.db".into(), "desktop.ini".into()],
            server: None,
            origin: None,
            labels: Labels::default(),
        }
    }
}

impl Options {
    /// Checks cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`FiledropError::InvalidOption`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_uploads == 0 {
            return Err(FiledropError::InvalidOption {
                name: "max_parallel_uploads".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.max_files == Some(0) {
            return Err(FiledropError::InvalidOption {
                name: "max_files".into(),
                reason: "must be at least 1 or unset".into(),
            });
        }
        Ok(())
    }

    /// Reads an option by field name; `None` for unknown names.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::Options;
    /// use serde_json::json;
    ///
    /// let options = Options::default();
    /// assert_eq!(options.query("max_parallel_uploads"), Some(json!(2)));
    /// assert_eq!(options.query("no_such_option"), None);
    /// ```
    #[must_use]
    pub fn query(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => fields.remove(name),
            _ => None,
        }
    }

    /// Writes an option by field name, coercing strings to the field's type.
    ///
    /// Returns the value now stored. On error the options are unchanged.
    ///
    /// # Errors
    ///
    /// - [`FiledropError::UnknownOption`] for names that are not fields
    /// - [`FiledropError::InvalidOption`] when no coercion fits the field
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::Options;
    /// use serde_json::json;
    ///
    /// let mut options = Options::default();
    /// assert_eq!(options.assign("allow_multiple", json!("true"))?, json!(true));
    /// assert_eq!(options.assign("max_files", json!("3"))?, json!(3));
    /// assert_eq!(options.assign("max_files", json!(null))?, json!(null));
    /// assert!(options.assign("max_parallel_uploads", json!("many")).is_err());
    /// # Ok::<(), filedrop::FiledropError>(())
    /// ```
    pub fn assign(&mut self, name: &str, value: Value) -> Result<Value> {
        let Ok(Value::Object(fields)) = serde_json::to_value(&*self) else {
            return Err(FiledropError::Config("options are not serializable".into()));
        };
        if !fields.contains_key(name) {
            return Err(FiledropError::UnknownOption(name.to_string()));
        }

        let mut first_error = None;
        for candidate in coercions(value) {
            let mut fields = fields.clone();
            fields.insert(name.to_string(), candidate);
            match serde_json::from_value::<Self>(Value::Object(fields)) {
                Ok(updated) => {
                    updated.validate()?;
                    *self = updated;
                    return self
                        .query(name)
                        .ok_or_else(|| FiledropError::UnknownOption(name.to_string()));
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(FiledropError::InvalidOption {
            name: name.to_string(),
            reason: first_error.map_or_else(|| "no value".to_string(), |e| e.to_string()),
        })
    }
}

/// Candidate interpretations of a value, most literal first.
fn coercions(value: Value) -> Vec<Value> {
    let Value::String(text) = &value else {
        return vec![value];
    };

    let trimmed = text.trim();
    let mut candidates = vec![value.clone()];
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => candidates.push(Value::Bool(true)),
        "false" => candidates.push(Value::Bool(false)),
        "null" | "" => candidates.push(Value::Null),
        _ => {}
    }
    if let Ok(number) = trimmed.parse::<u64>() {
        candidates.push(Value::from(number));
    }
    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        if json.is_object() || json.is_array() {
            candidates.push(json);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_options_are_reported() {
        let mut options = Options::default();
        assert!(matches!(
            options.assign("maxFiles", json!(3)),
            Err(FiledropError::UnknownOption(name)) if name == "maxFiles"
        ));
    }

    #[test]
    fn invalid_values_leave_options_unchanged() {
        let mut options = Options::default();
        assert!(options.assign("max_parallel_uploads", json!(0)).is_err());
        assert!(options.assign("allow_multiple", json!("sometimes")).is_err());
        assert_eq!(options, Options::default());
    }

    #[test]
    fn server_accepts_a_bare_url() {
        let mut options = Options::default();
        options.assign("server", json!("https://x.test/api")).expect("valid server");
        assert_eq!(options.server, Some(ServerConfig::from_url("https://x.test/api")));
    }

    #[test]
    fn labels_fall_back_when_body_is_empty() {
        let labels = Labels::default();
        assert_eq!(labels.processing_error("").main, "Error during upload");
        assert_eq!(labels.processing_error("Quota exceeded").main, "Quota exceeded");
        assert_eq!(labels.load_error().sub, "tap to retry");
        assert_eq!(labels.load_refused(404, "Not Found").sub, "404 (Not Found)");
    }
}
