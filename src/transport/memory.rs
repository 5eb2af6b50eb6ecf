//! In-memory transport.
//!
//! Records every request instead of performing it. Headless hosts and tests
//! inspect what was sent and answer through
//! [`Pond::on_transport`](crate::Pond::on_transport).

use std::cell::RefCell;
use std::rc::Rc;

use super::backend::Transport;
use super::messages::{Request, RequestId, RequestKind};

#[derive(Debug, Default)]
struct Journal {
    sent: Vec<(RequestId, Request)>,
    unread: usize,
    aborted: Vec<RequestId>,
}

/// A [`Transport`] that keeps requests in a shared journal.
///
/// Clones share the same journal, so a host can keep one handle while the
/// pond owns another.
///
/// # Examples
///
/// ```
/// use filedrop::transport::{MemoryTransport, Request, RequestId, RequestKind, Transport};
///
/// let journal = MemoryTransport::new();
/// let mut transport = journal.clone();
/// transport.send(RequestId(1), Request::process("/upload"));
///
/// let sent = journal.take_sent();
/// assert_eq!(sent.len(), 1);
/// assert_eq!(sent[0].1.kind, RequestKind::Process);
/// assert!(journal.take_sent().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    journal: Rc<RefCell<Journal>>,
}

impl MemoryTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(RequestId, Request)> {
        self.journal.borrow().sent.clone()
    }

    /// Requests sent since the previous call.
    #[must_use]
    pub fn take_sent(&self) -> Vec<(RequestId, Request)> {
        let mut journal = self.journal.borrow_mut();
        let start = journal.unread;
        journal.unread = journal.sent.len();
        journal.sent[start..].to_vec()
    }

    /// Ids of every request sent with the given kind.
    #[must_use]
    pub fn ids_of(&self, kind: RequestKind) -> Vec<RequestId> {
        self.journal
            .borrow()
            .sent
            .iter()
            .filter(|(_, request)| request.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids the core aborted, in order.
    #[must_use]
    pub fn aborted(&self) -> Vec<RequestId> {
        self.journal.borrow().aborted.clone()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, id: RequestId, request: Request) {
        tracing::trace!(%id, kind = ?request.kind, url = %request.url, "recording request");
        self.journal.borrow_mut().sent.push((id, request));
    }

    fn abort(&mut self, id: RequestId) {
        tracing::trace!(%id, "recording abort");
        self.journal.borrow_mut().aborted.push(id);
    }
}
