//! File and source domain model.
//!
//! A [`Source`] is what the embedder hands in: a native file, a base64 data
//! URI or a URL / server reference. A [`File`] is the concrete object an item
//! carries. Before loading completes the item holds a lightweight stub built
//! by [`File::stub`], whose name, size and type are guessed from the source.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MIME type used when nothing better can be guessed.
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A concrete file: metadata plus (once loaded) its bytes.
///
/// # Fields
///
/// - `name`: File name including extension
/// - `size`: Size in bytes, `None` while unknown (remote stub)
/// - `mime_type`: Media type, e.g. `image/png`
/// - `last_modified`: Modification timestamp
/// - `bytes`: Content, `None` for stubs that are not loaded yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub size: Option<u64>,
    pub mime_type: String,
    pub last_modified: DateTime<Utc>,
    #[serde(skip)]
    pub bytes: Option<Bytes>,
}

impl File {
    /// Creates a loaded file from a name and its content.
    ///
    /// The MIME type is guessed from the name's extension.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::domain::File;
    ///
    /// let file = File::new("report.pdf", b"%PDF-1.7".to_vec());
    /// assert_eq!(file.size, Some(8));
    /// assert_eq!(file.mime_type, "application/pdf");
    /// ```
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        let bytes = bytes.into();
        Self {
            mime_type: guess_mime_type(&name),
            size: Some(bytes.len() as u64),
            last_modified: Utc::now(),
            bytes: Some(bytes),
            name,
        }
    }

    /// Overrides the guessed MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Builds the placeholder file an item shows before its source loads.
    ///
    /// - Native files are used as-is.
    /// - Data URIs take their type from the header and estimate the decoded
    ///   size from the payload length.
    /// - URLs and server references take the last path segment as the name.
    #[must_use]
    pub fn stub(source: &Source) -> Self {
        match source {
            Source::File(file) => file.clone(),
            Source::DataUri(uri) => {
                let mime_type = data_uri_mime_type(uri).unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
                let payload = uri.split_once(',').map_or("", |(_, data)| data);
                let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
                let estimate = (payload.len() / 4 * 3).saturating_sub(padding);
                Self {
                    name: dated_file_name(&mime_type, Utc::now()),
                    size: Some(estimate as u64),
                    mime_type,
                    last_modified: Utc::now(),
                    bytes: None,
                }
            }
            Source::Remote(reference) => {
                let name = file_name_from_url(reference);
                Self {
                    mime_type: guess_mime_type(&name),
                    name,
                    size: None,
                    last_modified: Utc::now(),
                    bytes: None,
                }
            }
        }
    }

    /// Decodes a base64 data URI into a file.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the URI is malformed or the
    /// payload is not valid base64.
    pub fn from_data_uri(uri: &str) -> std::result::Result<Self, String> {
        let data = data_url::DataUrl::process(uri).map_err(|e| format!("invalid data URI: {e:?}"))?;
        let mime = data.mime_type();
        let mime_type = format!("{}/{}", mime.type_, mime.subtype);
        let (body, _) = data
            .decode_to_vec()
            .map_err(|e| format!("invalid base64 payload: {e:?}"))?;
        let now = Utc::now();

        Ok(Self {
            name: dated_file_name(&mime_type, now),
            size: Some(body.len() as u64),
            mime_type,
            last_modified: now,
            bytes: Some(Bytes::from(body)),
        })
    }

    /// Returns whether the content is present.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.bytes.is_some()
    }

    /// File name without its extension.
    #[must_use]
    pub fn name_without_extension(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map_or(self.name.as_str(), |(stem, _)| stem)
    }

    /// Lowercase extension, empty when the name has none.
    #[must_use]
    pub fn extension(&self) -> String {
        self.name
            .rsplit_once('.')
            .map_or_else(String::new, |(_, ext)| ext.to_lowercase())
    }
}

/// Original input value of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Source {
    /// A native file or blob.
    File(File),
    /// A `data:` URI with a base64 payload.
    DataUri(String),
    /// A URL to fetch, or a server file reference for limbo/local items.
    Remote(String),
}

impl Source {
    /// Classifies a text source as a data URI or a remote reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::domain::Source;
    ///
    /// assert!(matches!(Source::parse("data:text/plain;base64,aGk="), Source::DataUri(_)));
    /// assert!(matches!(Source::parse("https://example.com/a.png"), Source::Remote(_)));
    /// ```
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if is_base64_data_uri(text) {
            Self::DataUri(text.to_string())
        } else {
            Self::Remote(text.to_string())
        }
    }

    /// Returns whether the source carries nothing usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::File(_) => false,
            Self::DataUri(text) | Self::Remote(text) => text.trim().is_empty(),
        }
    }

    /// The textual reference for remote sources.
    #[must_use]
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Self::Remote(reference) => Some(reference),
            Self::File(_) | Self::DataUri(_) => None,
        }
    }
}

impl From<File> for Source {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

fn is_base64_data_uri(text: &str) -> bool {
    let Some(rest) = text.trim_start().strip_prefix("data:") else {
        return false;
    };
    rest.split_once(',')
        .is_some_and(|(header, _)| header.ends_with(";base64"))
}

fn data_uri_mime_type(uri: &str) -> Option<String> {
    let header = uri.trim_start().strip_prefix("data:")?.split_once(',')?.0;
    let mime = header.split(';').next()?.trim();
    (!mime.is_empty()).then(|| mime.to_string())
}

/// Guesses a MIME type from a file name's extension.
#[must_use]
pub fn guess_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// Extracts a file name from the last path segment of a URL.
///
/// Falls back to the raw text's last `/` segment for relative references and
/// server ids that are not valid URLs.
#[must_use]
pub fn file_name_from_url(reference: &str) -> String {
    let segment = url::Url::parse(reference).map_or_else(
        |_| {
            reference
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .map(str::to_string)
        },
        |url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        },
    );

    segment
        .map(|s| urlencoding::decode(&s).map_or(s.clone(), std::borrow::Cow::into_owned))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| reference.to_string())
}

/// Names a file created from raw data by its creation time and MIME type.
fn dated_file_name(mime_type: &str, at: DateTime<Utc>) -> String {
    let extension = mime_guess::get_mime_extensions_str(mime_type)
        .and_then(|exts| exts.first().copied())
        .unwrap_or("bin");
    format!("{}.{extension}", at.format("%Y-%m-%d_%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_round_trip_keeps_decoded_length() {
        let payload = b"hello, upload pipeline";
        let encoded = "aGVsbG8sIHVwbG9hZCBwaXBlbGluZQ==";
        let uri = format!("data:image/png;base64,{encoded}");

        let file = File::from_data_uri(&uri).expect("valid data uri");

        assert_eq!(file.size, Some(payload.len() as u64));
        assert_eq!(file.bytes.as_deref(), Some(&payload[..]));
        assert_eq!(file.mime_type, "image/png");
        assert!(file.name.ends_with(".png"), "got {}", file.name);
    }

    #[test]
    fn data_uri_stub_estimates_size() {
        let source = Source::parse("data:text/plain;base64,aGVsbG8sIHVwbG9hZCBwaXBlbGluZQ==");
        let stub = File::stub(&source);
        assert_eq!(stub.size, Some(22));
        assert!(!stub.is_loaded());
    }

    #[test]
    fn invalid_base64_is_reported() {
        assert!(File::from_data_uri("data:text/plain;base64,@@@").is_err());
    }

    #[test]
    fn remote_stub_uses_last_path_segment() {
        let stub = File::stub(&Source::parse("https://cdn.example.com/img/cat%20photo.jpg?w=200"));
        assert_eq!(stub.name, "cat photo.jpg");
        assert_eq!(stub.mime_type, "image/jpeg");
        assert_eq!(stub.size, None);
    }

    #[test]
    fn server_reference_stub_keeps_reference_as_name() {
        let stub = File::stub(&Source::parse("12345"));
        assert_eq!(stub.name, "12345");
        assert_eq!(stub.mime_type, DEFAULT_MIME_TYPE);
    }

    #[test]
    fn plain_data_uri_without_base64_is_remote() {
        assert!(matches!(Source::parse("data:text/plain,hi"), Source::Remote(_)));
    }

    #[test]
    fn name_helpers() {
        let file = File::new("Archive.TAR.GZ", Vec::new());
        assert_eq!(file.name_without_extension(), "Archive.TAR");
        assert_eq!(file.extension(), "gz");
    }
}
