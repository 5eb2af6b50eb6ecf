//! Transport boundary between the core and the host.
//!
//! The core describes network work as requests and receives results as
//! transport events; the host owns the actual I/O. Trace context from the
//! issuing span travels with every request.
//!
//! # Architecture
//!
//! - `backend`: The [`Transport`] trait
//! - `messages`: Requests, request ids, trace context and transport events
//! - `response`: Normalized responses and header parsing
//! - `server`: Endpoint configuration and request builders
//! - `memory`: A recording in-memory transport

pub mod backend;
pub mod memory;
pub mod messages;
pub mod response;
pub mod server;

pub use backend::Transport;
pub use memory::MemoryTransport;
pub use messages::{FormField, Request, RequestBody, RequestId, RequestKind, TraceContext, TransportEvent};
pub use response::{create_response, file_info_from_headers, FileInfo, Headers, Response, ResponseKind};
pub use server::{Endpoint, ResponseMapping, ServerConfig};

#[cfg(test)]
pub use backend::MockTransport;
