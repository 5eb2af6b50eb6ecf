//! Request and callback types exchanged with the host transport.
//!
//! The core never performs I/O itself. Loaders and processors describe what
//! they need as a [`Request`], hand it to the [`Transport`](super::Transport)
//! under a fresh [`RequestId`], and the host reports progress and completion
//! back as [`TransportEvent`]s for that id. Requests also carry distributed
//! tracing context so a host can continue the trace on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::response::{Headers, Response};
use crate::domain::File;

/// Distributed tracing context captured when a request is created.
///
/// Captures the current trace and span IDs from OpenTelemetry so the host can
/// forward them as a W3C `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// OpenTelemetry trace ID as a hex string.
    pub trace_id: String,

    /// Span ID of the span that issued the request.
    pub parent_span_id: String,
}

impl TraceContext {
    /// Creates a trace context from the current tracing span.
    ///
    /// Returns `None` if the current span context is invalid, which is the
    /// case whenever no OpenTelemetry layer is installed.
    #[must_use]
    pub fn from_current() -> Option<Self> {
        use opentelemetry::trace::TraceContextExt;
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let span = tracing::Span::current();

        let otel_context = span.context();
        let span_ref = otel_context.span();
        let span_context = span_ref.span_context();

        if span_context.is_valid() {
            let trace_id = format!("{:032x}", span_context.trace_id());
            let parent_span_id = format!("{:016x}", span_context.span_id());

            tracing::trace!(
                trace_id = %trace_id,
                parent_span_id = %parent_span_id,
                "capturing trace context"
            );

            Some(Self {
                trace_id,
                parent_span_id,
            })
        } else {
            None
        }
    }

    /// Formats the context as a W3C `traceparent` header value.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::transport::TraceContext;
    ///
    /// let ctx = TraceContext {
    ///     trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
    ///     parent_span_id: "00f067aa0ba902b7".into(),
    /// };
    /// assert_eq!(
    ///     ctx.traceparent(),
    ///     "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
    /// );
    /// ```
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.parent_span_id)
    }
}

/// Identifier of one in-flight request, unique per [`Pond`](crate::Pond).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Server capability a request exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Upload a file.
    Process,
    /// Undo an upload by server id.
    Revert,
    /// Download a remote URL.
    Fetch,
    /// Restore a temporary (limbo) server file.
    Restore,
    /// Load a persisted (local) server file.
    Load,
    /// Delete a persisted server file.
    Remove,
}

impl RequestKind {
    /// HTTP method used when an endpoint does not name one.
    #[must_use]
    pub const fn default_method(self) -> &'static str {
        match self {
            Self::Process => "POST",
            Self::Revert | Self::Remove => "DELETE",
            Self::Fetch | Self::Restore | Self::Load => "GET",
        }
    }
}

/// One part of a multipart form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text { name: String, value: String },
    File { name: String, file: File },
}

/// Payload of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    Form(Vec<FormField>),
}

/// A transport request as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub with_credentials: bool,
    /// Timeout in milliseconds, enforced by the host.
    pub timeout: Option<u64>,
    pub body: RequestBody,
    pub trace_context: Option<TraceContext>,
}

impl Request {
    /// Creates a request and stamps it with the current trace context.
    pub fn new(kind: RequestKind, url: impl Into<String>) -> Self {
        let trace_context = TraceContext::from_current();
        let mut headers = Headers::new();
        if let Some(ctx) = &trace_context {
            headers.insert("traceparent", ctx.traceparent());
        }

        Self {
            kind,
            method: kind.default_method().to_string(),
            url: url.into(),
            headers,
            with_credentials: false,
            timeout: None,
            body: RequestBody::Empty,
            trace_context,
        }
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Returns the file carried by a form body, if any.
    #[must_use]
    pub fn file(&self) -> Option<&File> {
        match &self.body {
            RequestBody::Form(fields) => fields.iter().find_map(|field| match field {
                FormField::File { file, .. } => Some(file),
                FormField::Text { .. } => None,
            }),
            RequestBody::Empty | RequestBody::Text(_) => None,
        }
    }
}

/// Generates one constructor per [`RequestKind`].
///
/// Each constructor attaches the current trace context like [`Request::new`].
macro_rules! request_builders {
    (
        $(
            $builder_name:ident => $kind:ident
        ),* $(,)?
    ) => {
        impl Request {
            $(
                #[doc = concat!("Create a `", stringify!($kind), "` request with the current trace context")]
                pub fn $builder_name(url: impl Into<String>) -> Self {
                    Self::new(RequestKind::$kind, url)
                }
            )*
        }
    };
}

request_builders! {
    process => Process,
    revert => Revert,
    fetch => Fetch,
    restore => Restore,
    load => Load,
    remove => Remove,
}

/// Callback reported by the host for an in-flight request.
///
/// Per request the host reports `Headers? → Progress* → (Load | Error |
/// Timeout | Abort)`. Events for requests the core already abandoned are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Response headers arrived.
    Headers(Headers),
    /// Transfer progress; `computable` is false when the total is unknown.
    Progress {
        computable: bool,
        loaded: u64,
        total: u64,
    },
    /// Request succeeded.
    Load(Response),
    /// Request failed.
    Error(Response),
    /// The host's per-request timeout elapsed.
    Timeout,
    /// The host aborted the request on its own.
    Abort,
}
