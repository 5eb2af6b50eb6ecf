//! Host-facing runtime shared by items and handlers.
//!
//! The runtime owns everything that touches the outside world or the passage
//! of time: the virtual clock and its timers, the transport and the routing
//! table of in-flight requests, the random source used for perceived
//! progress, and the channel items publish their lifecycle events on.
//!
//! Items receive `&mut Runtime` next to `&mut self`, so they can start
//! requests and timers without holding a reference to the store.

use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;

use super::timers::{TimerId, TimerQueue};
use crate::app::Ticket;
use crate::item::{ItemEvent, ItemId};
use crate::transport::{Request, RequestId, Transport};

/// Work a timer performs when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerTask {
    /// Next perceived-progress tick of an item's upload.
    PerceivedProgress { item: ItemId },
    /// Re-dispatch a processing request.
    RequestProcessing {
        item: ItemId,
        ticket: Option<Ticket>,
        attempt: u32,
    },
    /// Debounced list-changed notification.
    ListUpdated,
    /// Debounced metadata follow-up for one item.
    MetadataUpdated { item: ItemId },
}

/// Which component an in-flight request reports back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Loader,
    Processor,
    Revert,
    Remove,
}

/// Owner of an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub item: ItemId,
    pub channel: Channel,
}

/// Clock, timers, transport and event channel of one pond.
pub struct Runtime {
    timers: TimerQueue<TimerTask>,
    transport: Box<dyn Transport>,
    next_request: u64,
    routes: HashMap<RequestId, Route>,
    rng: fastrand::Rng,
    events: VecDeque<(ItemId, ItemEvent)>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("now", &self.timers.now())
            .field("timers", &self.timers.len())
            .field("in_flight", &self.routes.len())
            .field("queued_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Creates a runtime at virtual time zero.
    ///
    /// A `seed` makes perceived-progress timing reproducible.
    pub fn new(transport: Box<dyn Transport>, seed: Option<u64>) -> Self {
        Self {
            timers: TimerQueue::default(),
            transport,
            next_request: 0,
            routes: HashMap::new(),
            rng: seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed),
            events: VecDeque::new(),
        }
    }

    /// Current virtual time in milliseconds.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.timers.now()
    }

    pub fn schedule(&mut self, delay: u64, task: TimerTask) -> TimerId {
        tracing::trace!(delay, ?task, "scheduling timer");
        self.timers.schedule(delay, task)
    }

    pub fn cancel(&mut self, timer: TimerId) {
        self.timers.cancel(timer);
    }

    /// Pops the next task due at or before `until`.
    pub fn pop_due(&mut self, until: u64) -> Option<TimerTask> {
        self.timers.pop_due(until)
    }

    pub fn advance_to(&mut self, until: u64) {
        self.timers.advance_to(until);
    }

    /// Uniform random integer in `range`.
    pub fn random(&mut self, range: RangeInclusive<u64>) -> u64 {
        self.rng.u64(range)
    }

    /// Sends a request on behalf of `item` and remembers who receives the
    /// response.
    pub fn send(&mut self, item: &ItemId, channel: Channel, request: Request) -> RequestId {
        self.next_request += 1;
        let id = RequestId(self.next_request);
        tracing::debug!(%id, %item, ?channel, kind = ?request.kind, url = %request.url, "sending request");
        self.routes.insert(
            id,
            Route {
                item: item.clone(),
                channel,
            },
        );
        self.transport.send(id, request);
        id
    }

    /// Aborts an in-flight request. Later transport events for it are
    /// dropped because its route is gone.
    pub fn abort(&mut self, id: RequestId) {
        if self.routes.remove(&id).is_some() {
            tracing::debug!(%id, "aborting request");
            self.transport.abort(id);
        }
    }

    /// Looks up the owner of a request.
    #[must_use]
    pub fn route(&self, id: RequestId) -> Option<&Route> {
        self.routes.get(&id)
    }

    /// Forgets a request that reached a terminal event.
    pub fn finish(&mut self, id: RequestId) {
        self.routes.remove(&id);
    }

    /// Publishes an item lifecycle event.
    pub fn emit(&mut self, item: &ItemId, event: ItemEvent) {
        tracing::trace!(%item, ?event, "item event");
        self.events.push_back((item.clone(), event));
    }

    /// Takes the oldest unhandled item event.
    pub fn next_event(&mut self) -> Option<(ItemId, ItemEvent)> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, RequestKind};

    #[test]
    fn aborted_requests_lose_their_route() {
        let journal = MemoryTransport::new();
        let mut runtime = Runtime::new(Box::new(journal.clone()), Some(7));
        let item = ItemId::from("a");

        let id = runtime.send(&item, Channel::Processor, Request::process("/"));
        assert_eq!(runtime.route(id).map(|r| r.channel), Some(Channel::Processor));

        runtime.abort(id);
        runtime.abort(id);

        assert!(runtime.route(id).is_none());
        assert_eq!(journal.aborted(), vec![id]);
        assert_eq!(journal.ids_of(RequestKind::Process), vec![id]);
    }

    #[test]
    fn seeded_runtimes_draw_the_same_numbers() {
        let mut a = Runtime::new(Box::new(MemoryTransport::new()), Some(42));
        let mut b = Runtime::new(Box::new(MemoryTransport::new()), Some(42));
        let xs: Vec<u64> = (0..5).map(|_| a.random(25..=250)).collect();
        let ys: Vec<u64> = (0..5).map(|_| b.random(25..=250)).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|x| (25..=250).contains(x)));
    }
}
