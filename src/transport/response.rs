//! Normalized transport responses.
//!
//! Every transport outcome is reduced to a [`Response`] carrying
//! `{kind, code, body, headers}` so loaders, processors and error events see
//! one shape regardless of how the host performed the request. This module
//! also extracts file information (name, size, server id) from response
//! headers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Header carrying a server-assigned file id on fetch/restore responses.
pub const TRANSFER_ID_HEADER: &str = "X-Content-Transfer-Id";

/// Outcome class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Load,
    Error,
    Abort,
    Warning,
}

/// Response headers as ordered name/value pairs.
///
/// Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses a raw `name: value` block, one header per line.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::transport::Headers;
    ///
    /// let headers = Headers::parse("Content-Length: 12\r\ncontent-type: text/plain\r\n");
    /// assert_eq!(headers.get("content-length"), Some("12"));
    /// assert_eq!(headers.get("Content-Type"), Some("text/plain"));
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .filter(|(name, _)| !name.is_empty())
            .collect()
    }

    /// Appends a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Returns the first value for `name`, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over all name/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns whether no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A normalized transport response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseKind,
    pub code: u16,
    pub body: Bytes,
    pub headers: Headers,
}

impl Response {
    /// Creates a successful response.
    pub fn load(code: u16, body: impl Into<Bytes>) -> Self {
        create_response(ResponseKind::Load, code, body, Headers::new())
    }

    /// Creates an error response.
    pub fn error(code: u16, body: impl Into<Bytes>) -> Self {
        create_response(ResponseKind::Error, code, body, Headers::new())
    }

    /// Creates a warning, used for non-fatal refusals such as max files.
    pub fn warning(code: u16, body: impl Into<Bytes>) -> Self {
        create_response(ResponseKind::Warning, code, body, Headers::new())
    }

    /// Creates an abort marker.
    #[must_use]
    pub fn abort() -> Self {
        create_response(ResponseKind::Abort, 0, Bytes::new(), Headers::new())
    }

    /// Attaches headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Returns whether the status code is a 4xx client error.
    ///
    /// Client errors are not retryable without new input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }
}

/// Builds a normalized response.
pub fn create_response(kind: ResponseKind, code: u16, body: impl Into<Bytes>, headers: Headers) -> Response {
    Response {
        kind,
        code,
        body: body.into(),
        headers,
    }
}

/// File information announced by response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Name from `Content-Disposition`.
    pub name: Option<String>,
    /// Size from `Content-Length`.
    pub size: Option<u64>,
    /// Server file id from [`TRANSFER_ID_HEADER`].
    pub source: Option<String>,
}

/// Extracts file information from response headers.
///
/// # Examples
///
/// ```
/// use filedrop::transport::{file_info_from_headers, Headers};
///
/// let headers = Headers::parse(
///     "Content-Disposition: attachment; filename=\"cat.png\"\nContent-Length: 512\nX-Content-Transfer-Id: tmp-9",
/// );
/// let info = file_info_from_headers(&headers);
/// assert_eq!(info.name.as_deref(), Some("cat.png"));
/// assert_eq!(info.size, Some(512));
/// assert_eq!(info.source.as_deref(), Some("tmp-9"));
/// ```
#[must_use]
pub fn file_info_from_headers(headers: &Headers) -> FileInfo {
    FileInfo {
        name: headers
            .get("Content-Disposition")
            .and_then(filename_from_content_disposition),
        size: headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok()),
        source: headers
            .get(TRANSFER_ID_HEADER)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from),
    }
}

/// Reads the file name from a `Content-Disposition` value.
///
/// Prefers the RFC 5987 `filename*=charset''value` form over `filename=`.
fn filename_from_content_disposition(header: &str) -> Option<String> {
    let params = header.split(';').map(str::trim);

    let mut plain = None;
    for param in params {
        if let Some(extended) = param.strip_prefix("filename*=") {
            let encoded = extended.split_once("''").map_or(extended, |(_, v)| v);
            let encoded = encoded.trim_matches(['"', '\'']);
            if let Ok(decoded) = urlencoding::decode(encoded) {
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
        } else if let Some(value) = param.strip_prefix("filename=") {
            let value = value.trim_matches(['"', '\'']);
            if !value.is_empty() {
                plain = Some(value.to_string());
            }
        }
    }
    plain
}
