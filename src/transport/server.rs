//! Server endpoint configuration and request builders.
//!
//! A [`ServerConfig`] maps each server capability to an [`Endpoint`] or to
//! `None`, which disables that capability. It deserializes from either a
//! bare URL (all default endpoints under that base) or a table:
//!
//! ```toml
//! [options.server]
//! url = "https://api.example.com"
//! process = "/upload"
//! revert = { url = "/upload", method = "DELETE", on_load = { from = "header", value = "X-Id" } }
//! restore = "/restore?id="
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::messages::{FormField, Request, RequestBody, RequestKind};
use super::response::Response;
use crate::domain::{File, Metadata};

/// Where to read a value from in a server response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", content = "value", rename_all = "snake_case")]
pub enum ResponseMapping {
    /// The whole body as text.
    #[default]
    Body,
    /// A response header.
    Header(String),
    /// A JSON pointer into the body, e.g. `/data/id`.
    JsonField(String),
}

impl ResponseMapping {
    /// Extracts the mapped value from a response.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::transport::{Response, ResponseMapping};
    ///
    /// let response = Response::load(200, r#"{"file":{"id":"tmp-42"}}"#);
    /// let id = ResponseMapping::JsonField("/file/id".into()).extract(&response);
    /// assert_eq!(id.as_deref(), Some("tmp-42"));
    /// ```
    #[must_use]
    pub fn extract(&self, response: &Response) -> Option<String> {
        match self {
            Self::Body => Some(response.text()),
            Self::Header(name) => response.headers.get(name).map(str::to_string),
            Self::JsonField(pointer) => {
                let json: serde_json::Value = serde_json::from_slice(&response.body).ok()?;
                match json.pointer(pointer)? {
                    serde_json::Value::String(text) => Some(text.clone()),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                }
            }
        }
    }
}

/// A configured server endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EndpointSetting")]
pub struct Endpoint {
    /// Path appended to [`ServerConfig::url`].
    pub url: String,
    /// HTTP method, defaulting per capability.
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub with_credentials: bool,
    /// Timeout in milliseconds.
    pub timeout: Option<u64>,
    /// Maps a successful response to the value the caller needs (server id).
    pub on_load: ResponseMapping,
    /// Maps an error response to the body surfaced to the user.
    pub on_error: ResponseMapping,
}

impl Endpoint {
    /// Creates an endpoint with defaults for everything but the path.
    pub fn path(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    fn request(&self, kind: RequestKind, base: &str, suffix: &str) -> Request {
        let mut request = Request::new(kind, format!("{base}{}{suffix}", self.url));
        if let Some(method) = &self.method {
            request.method = method.to_uppercase();
        }
        for (name, value) in &self.headers {
            request.headers.insert(name, value);
        }
        request.with_credentials = self.with_credentials;
        request.timeout = self.timeout;
        request
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointSetting {
    Path(String),
    Descriptor {
        #[serde(default)]
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        with_credentials: bool,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        on_load: ResponseMapping,
        #[serde(default)]
        on_error: ResponseMapping,
    },
}

impl From<EndpointSetting> for Endpoint {
    fn from(setting: EndpointSetting) -> Self {
        match setting {
            EndpointSetting::Path(url) => Self::path(url),
            EndpointSetting::Descriptor {
                url,
                method,
                headers,
                with_credentials,
                timeout,
                on_load,
                on_error,
            } => Self {
                url,
                method,
                headers,
                with_credentials,
                timeout,
                on_load,
                on_error,
            },
        }
    }
}

/// Server capabilities of a pond.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ServerSetting")]
pub struct ServerConfig {
    /// Base URL every endpoint path is appended to.
    pub url: String,
    pub process: Option<Endpoint>,
    pub revert: Option<Endpoint>,
    pub fetch: Option<Endpoint>,
    pub restore: Option<Endpoint>,
    pub load: Option<Endpoint>,
    pub remove: Option<Endpoint>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerSetting {
    Url(String),
    Table {
        #[serde(default)]
        url: String,
        #[serde(default)]
        process: Option<Endpoint>,
        #[serde(default)]
        revert: Option<Endpoint>,
        #[serde(default)]
        fetch: Option<Endpoint>,
        #[serde(default)]
        restore: Option<Endpoint>,
        #[serde(default)]
        load: Option<Endpoint>,
        #[serde(default)]
        remove: Option<Endpoint>,
    },
}

impl From<ServerSetting> for ServerConfig {
    fn from(setting: ServerSetting) -> Self {
        match setting {
            ServerSetting::Url(url) => Self::from_url(url),
            ServerSetting::Table {
                url,
                process,
                revert,
                fetch,
                restore,
                load,
                remove,
            } => Self {
                url,
                process,
                revert,
                fetch,
                restore,
                load,
                remove,
            },
        }
    }
}

impl ServerConfig {
    /// Expands a bare base URL into the default endpoints.
    ///
    /// Process, revert, fetch, restore and load are served at the base URL
    /// itself (GET endpoints take the source as a query); remove stays
    /// disabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::transport::ServerConfig;
    ///
    /// let server = ServerConfig::from_url("https://api.example.com/files");
    /// assert!(server.process.is_some());
    /// assert!(server.remove.is_none());
    /// ```
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            process: Some(Endpoint::path("")),
            revert: Some(Endpoint::path("")),
            fetch: Some(Endpoint::path("?fetch=")),
            restore: Some(Endpoint::path("?restore=")),
            load: Some(Endpoint::path("?load=")),
            remove: None,
        }
    }

    /// Returns the endpoint configured for a capability.
    #[must_use]
    pub const fn endpoint(&self, kind: RequestKind) -> Option<&Endpoint> {
        match kind {
            RequestKind::Process => self.process.as_ref(),
            RequestKind::Revert => self.revert.as_ref(),
            RequestKind::Fetch => self.fetch.as_ref(),
            RequestKind::Restore => self.restore.as_ref(),
            RequestKind::Load => self.load.as_ref(),
            RequestKind::Remove => self.remove.as_ref(),
        }
    }

    /// Builds the upload request: a form with the metadata as JSON and the
    /// file, both under the field `name`.
    #[must_use]
    pub fn process_request(&self, name: &str, file: &File, metadata: &Metadata) -> Option<Request> {
        let endpoint = self.process.as_ref()?;
        let body = RequestBody::Form(vec![
            FormField::Text {
                name: name.to_string(),
                value: metadata.to_value().to_string(),
            },
            FormField::File {
                name: name.to_string(),
                file: file.clone(),
            },
        ]);
        Some(endpoint.request(RequestKind::Process, &self.url, "").with_body(body))
    }

    /// Builds the revert request, sending the server id as the body.
    #[must_use]
    pub fn revert_request(&self, server_id: &str) -> Option<Request> {
        let endpoint = self.revert.as_ref()?;
        Some(
            endpoint
                .request(RequestKind::Revert, &self.url, "")
                .with_body(RequestBody::Text(server_id.to_string())),
        )
    }

    /// Builds a fetch, restore or load request for `source`.
    ///
    /// The source is URL-encoded and appended to the endpoint.
    #[must_use]
    pub fn get_request(&self, kind: RequestKind, source: &str) -> Option<Request> {
        let endpoint = self.endpoint(kind)?;
        Some(endpoint.request(kind, &self.url, &urlencoding::encode(source)))
    }

    /// Builds the remove request for a persisted file.
    #[must_use]
    pub fn remove_request(&self, source: &str) -> Option<Request> {
        let endpoint = self.remove.as_ref()?;
        Some(
            endpoint
                .request(RequestKind::Remove, &self.url, "")
                .with_body(RequestBody::Text(source.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Headers;

    #[test]
    fn bare_url_expands_to_defaults() {
        let server: ServerConfig = serde_json::from_str(r#""https://x.test/api""#).expect("parse");
        assert_eq!(server, ServerConfig::from_url("https://x.test/api"));
    }

    #[test]
    fn table_disables_missing_endpoints() {
        let server: ServerConfig = serde_json::from_str(
            r#"{"url": "https://x.test", "process": "/up", "revert": {"url": "/up", "method": "post"}}"#,
        )
        .expect("parse");
        assert!(server.fetch.is_none());

        let revert = server.revert_request("abc").expect("revert configured");
        assert_eq!(revert.method, "POST");
        assert_eq!(revert.url, "https://x.test/up");
        assert_eq!(revert.body, RequestBody::Text("abc".into()));
    }

    #[test]
    fn get_requests_encode_source() {
        let server = ServerConfig::from_url("https://x.test/api");
        let request = server
            .get_request(RequestKind::Restore, "tmp/a b")
            .expect("restore configured");
        assert_eq!(request.url, "https://x.test/api?restore=tmp%2Fa%20b");
        assert_eq!(request.method, "GET");
    }

    #[test]
    fn process_request_carries_metadata_and_file() {
        let server = ServerConfig::from_url("/api");
        let mut metadata = Metadata::new();
        metadata.set("album", serde_json::json!("summer"), false);
        let file = File::new("a.jpg", b"jpg".to_vec());

        let request = server.process_request("filedrop", &file, &metadata).expect("process configured");

        let RequestBody::Form(fields) = &request.body else {
            panic!("expected form body");
        };
        assert_eq!(
            fields[0],
            FormField::Text {
                name: "filedrop".into(),
                value: r#"{"album":"summer"}"#.into()
            }
        );
        assert_eq!(request.file(), Some(&file));
    }

    #[test]
    fn header_mapping_reads_response_header() {
        let mut headers = Headers::new();
        headers.insert("X-Id", "srv-7");
        let response = Response::load(201, "").with_headers(headers);
        assert_eq!(
            ResponseMapping::Header("x-id".into()).extract(&response).as_deref(),
            Some("srv-7")
        );
    }
}
