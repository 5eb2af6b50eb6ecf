//! Tracing setup for embedders.
//!
//! The core logs through `tracing` everywhere. A subscriber is installed
//! only by [`init_tracing`], either called by the embedder or by
//! [`initialize`](crate::initialize) when a trace level is configured.
//!
//! # Architecture
//!
//! ```text
//! tracing macros → EnvFilter → fmt layer (stderr)
//!                            → tracing-opentelemetry → OpenTelemetry SDK
//! ```
//!
//! The OpenTelemetry layer gives every span a W3C trace context, which
//! outgoing requests carry as a `traceparent` header. No exporter is
//! attached; the hosting application decides where spans go.
//!
//! # Configuration
//!
//! The level comes from `RUST_LOG` when set, otherwise from
//! [`Config::trace_level`](crate::Config::trace_level), otherwise `info`.

mod init;

pub use init::init_tracing;
