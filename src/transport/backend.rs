//! Transport abstraction.
//!
//! This module defines the [`Transport`] trait through which loaders and
//! processors reach the network. The core only describes requests; the host
//! performs them and reports back through
//! [`Pond::on_transport`](crate::Pond::on_transport).
//!
//! # Design Philosophy
//!
//! The trait is deliberately fire-and-forget. Completion flows back as data
//! ([`TransportEvent`](super::TransportEvent)) rather than as callbacks, so a
//! request never holds a borrow of the item that issued it.

use super::messages::{Request, RequestId};

/// Sends requests on behalf of the core.
///
/// Custom server functions are expressed by implementing this trait and
/// switching on [`Request::kind`].
///
/// # Implementations
///
/// - [`MemoryTransport`](super::MemoryTransport): records requests in memory
///
/// # Examples
///
/// ```
/// use filedrop::transport::{Request, RequestId, Transport};
///
/// struct Printer;
///
/// impl Transport for Printer {
///     fn send(&mut self, id: RequestId, request: Request) {
///         println!("{id}: {} {}", request.method, request.url);
///     }
///
///     fn abort(&mut self, id: RequestId) {
///         println!("{id}: abort");
///     }
/// }
///
/// Printer.send(RequestId(1), Request::fetch("https://example.com/a.png"));
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Starts a request.
    ///
    /// The host must eventually report exactly one terminal event for `id`
    /// unless the core aborts it first.
    fn send(&mut self, id: RequestId, request: Request);

    /// Cancels an in-flight request.
    ///
    /// The core treats the request as settled as soon as this is called;
    /// events the host still reports for `id` are ignored.
    fn abort(&mut self, id: RequestId);
}
