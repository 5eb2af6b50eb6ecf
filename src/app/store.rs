//! The store: item collection, dispatcher and host plumbing.
//!
//! [`Store`] is the single writer of the item collection and the processing
//! queue. Everything else talks to it through [`Store::dispatch`].
//!
//! # Architecture
//!
//! ```text
//! dispatch(action, blocking)
//!   ├─ blocking ──────────────► deferred queue ──► drain_deferred()
//!   └─ handler (may dispatch) ─► frame queue ─────► take_actions()
//!                              └► public events ──► advance()
//! ```
//!
//! Handlers never wait. Work that finishes later comes back through three
//! channels, all drained by [`Store::settle`]:
//!
//! - item events published on the runtime,
//! - filter chains running on a local executor, each tagged with a
//!   continuation,
//! - timers fired by [`Store::advance`].
//!
//! Results promised to the embedder are tracked by [`Ticket`]s and always
//! settled: resolved on success, rejected on failure, abort or release.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use serde_json::Value;

use super::actions::{Action, AddRequest, OutputPurpose, Ticket};
use super::events::{self, PondEvent};
use super::options::Options;
use crate::domain::error::{FiledropError, Result};
use crate::domain::{File, FileError, ItemStatus, StatusLabel};
use crate::filter::{FilterContext, FilterKey, FilterResult, FilterValue, Filters};
use crate::infrastructure::{Channel, Runtime, TimerId, TimerTask};
use crate::item::{FileHandle, Item, ItemId};
use crate::transport::{RequestId, Response, Transport, TransportEvent};

/// Result of an asynchronous per-file operation.
pub type Outcome<T> = std::result::Result<T, FileError>;

/// Receiver of an asynchronous per-file result.
pub type Pending<T> = oneshot::Receiver<Outcome<T>>;

enum Responder {
    Handle(oneshot::Sender<Outcome<FileHandle>>),
    Handles(oneshot::Sender<Outcome<Vec<FileHandle>>>),
    Output(oneshot::Sender<Outcome<File>>),
}

/// What to do with the result of a filter chain.
#[derive(Debug)]
pub(super) enum Continuation {
    /// `LoadFile` over a freshly loaded file.
    FileLoaded { item: ItemId },
    /// `DidLoadItem`; the add is accepted once it passes.
    ItemLoaded { item: ItemId },
    /// `ShouldPrepareOutput` right after loading.
    LoadOutputDecision { item: ItemId },
    /// `ShouldPrepareOutput` after a metadata change.
    MetadataOutputDecision { item: ItemId },
    /// `PrepareOutput` ahead of an upload.
    UploadOutput { item: ItemId },
    /// `PrepareOutput` outside an upload.
    Output { item: ItemId, purpose: OutputPurpose },
    /// `CompletePrepareOutput` outside an upload.
    CompletedOutput { item: ItemId, purpose: OutputPurpose },
}

type Finished = Rc<RefCell<VecDeque<(Continuation, FilterResult)>>>;

/// Item collection, options, filters and pending work of one pond.
pub struct Store {
    pub(super) items: Vec<Item>,
    pub(super) options: Options,
    pub(super) filters: Filters,
    pub(super) runtime: Runtime,
    pub(super) processing_queue: VecDeque<ItemId>,
    frame_actions: Vec<Action>,
    pub(super) deferred: VecDeque<Action>,
    pub(super) outbox: VecDeque<PondEvent>,
    responders: HashMap<Ticket, Responder>,
    next_ticket: u64,
    pub(super) add_tickets: HashMap<ItemId, Ticket>,
    pub(super) processing_tickets: HashMap<ItemId, Vec<Ticket>>,
    pub(super) abort_waiters: HashMap<ItemId, Vec<Ticket>>,
    pub(super) invalid_status: HashMap<ItemId, StatusLabel>,
    pub(super) remove_after_abort: HashSet<ItemId>,
    /// Removals waiting for a revert, with the caller's ticket.
    pub(super) remove_after_revert: HashMap<ItemId, Option<Ticket>>,
    /// Adds waiting for the forced revert of the item they replace.
    pub(super) replacements: HashMap<ItemId, (AddRequest, Option<Ticket>)>,
    /// In-flight remove requests of local items.
    pub(super) removals: HashMap<RequestId, (ItemId, Option<Ticket>)>,
    pub(super) list_timer: Option<TimerId>,
    pub(super) metadata_timers: HashMap<ItemId, TimerId>,
    pool: LocalPool,
    finished: Finished,
    pub(super) destroyed: bool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("items", &self.items.len())
            .field("queue", &self.processing_queue)
            .field("deferred", &self.deferred.len())
            .field("runtime", &self.runtime)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`FiledropError::InvalidOption`] when `options` fail validation.
    pub fn new(options: Options, transport: Box<dyn Transport>, seed: Option<u64>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            items: Vec::new(),
            options,
            filters: Filters::new(),
            runtime: Runtime::new(transport, seed),
            processing_queue: VecDeque::new(),
            frame_actions: Vec::new(),
            deferred: VecDeque::new(),
            outbox: VecDeque::new(),
            responders: HashMap::new(),
            next_ticket: 0,
            add_tickets: HashMap::new(),
            processing_tickets: HashMap::new(),
            abort_waiters: HashMap::new(),
            invalid_status: HashMap::new(),
            remove_after_abort: HashSet::new(),
            remove_after_revert: HashMap::new(),
            replacements: HashMap::new(),
            removals: HashMap::new(),
            list_timer: None,
            metadata_timers: HashMap::new(),
            pool: LocalPool::new(),
            finished: Rc::new(RefCell::new(VecDeque::new())),
            destroyed: false,
        })
    }

    // Dispatch

    /// Dispatches an action.
    ///
    /// Blocking actions are deferred until [`Store::drain_deferred`]; all
    /// others run their handler right away and are then queued for the
    /// current frame.
    pub fn dispatch(&mut self, action: Action, blocking: bool) {
        if self.destroyed {
            tracing::debug!(action = action.name(), "dropping action after destroy");
            return;
        }
        if blocking {
            tracing::trace!(action = action.name(), "deferring blocking action");
            self.deferred.push_back(action);
            return;
        }
        self.handle(&action);
        self.record(action);
    }

    fn record(&mut self, action: Action) {
        let published = events::translate(
            &action,
            |id| self.find_item(id).map(Item::handle),
            || self.active_items().map(Item::handle).collect(),
        );
        self.outbox.extend(published);
        self.frame_actions.push(action);
    }

    /// Takes the actions dispatched since the last call.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.frame_actions)
    }

    /// Takes the public events waiting for delivery.
    pub fn take_events(&mut self) -> Vec<PondEvent> {
        self.outbox.drain(..).collect()
    }

    /// Returns whether no frame actions and no public events are waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.frame_actions.is_empty() && self.outbox.is_empty()
    }

    /// Re-dispatches every blocking action deferred so far.
    pub fn drain_deferred(&mut self) {
        let deferred: Vec<Action> = self.deferred.drain(..).collect();
        if !deferred.is_empty() {
            tracing::debug!(count = deferred.len(), "draining deferred actions");
        }
        for action in deferred {
            self.dispatch(action, false);
        }
        self.settle();
    }

    // Queries

    /// Items that are not archived, in list order.
    pub fn active_items(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|item| !item.is_archived())
    }

    /// An active item by id.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.active_items().find(|item| item.id() == id)
    }

    /// Any item by id, archived ones included.
    #[must_use]
    pub fn find_item(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// The active item at `index`.
    #[must_use]
    pub fn item_at(&self, index: usize) -> Option<&Item> {
        self.active_items().nth(index)
    }

    #[must_use]
    pub fn items_by_status(&self, status: ItemStatus) -> Vec<&Item> {
        self.active_items().filter(|item| item.status() == status).collect()
    }

    #[must_use]
    pub fn total_items(&self) -> usize {
        self.active_items().count()
    }

    /// Returns whether uploads go to a server.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.options
            .server
            .as_ref()
            .map_or(false, |server| server.process.is_some())
    }

    /// Ids waiting for an upload slot, oldest first.
    pub fn processing_queue(&self) -> impl Iterator<Item = &ItemId> {
        self.processing_queue.iter()
    }

    #[must_use]
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Reads an option by name; `None` for unknown names.
    #[must_use]
    pub fn query_option(&self, name: &str) -> Option<Value> {
        self.options.query(name)
    }

    pub fn filters_mut(&mut self) -> &mut Filters {
        &mut self.filters
    }

    /// Current virtual time in milliseconds.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.runtime.now()
    }

    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Assigns an option and acknowledges it with `DidSetOption`.
    ///
    /// The acknowledgment carries the value now in effect, which is the
    /// previous one when the assignment was refused.
    ///
    /// # Errors
    ///
    /// See [`Options::assign`].
    pub fn set_option(&mut self, name: &str, value: Value) -> Result<Value> {
        let result = self.options.assign(name, value);
        match &result {
            Err(FiledropError::UnknownOption(_)) => {}
            Ok(_) | Err(_) => {
                if let Some(current) = self.options.query(name) {
                    self.dispatch(
                        Action::DidSetOption {
                            name: name.to_string(),
                            value: current,
                        },
                        false,
                    );
                }
            }
        }
        if result.is_ok() && name == "max_parallel_uploads" {
            self.process_next();
        }
        result
    }

    // Item access

    pub(super) fn with_item<R>(&mut self, id: &ItemId, f: impl FnOnce(&mut Item, &mut Runtime) -> R) -> Option<R> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id() == id && !item.is_archived())?;
        Some(f(item, &mut self.runtime))
    }

    pub(super) fn with_any_item<R>(&mut self, id: &ItemId, f: impl FnOnce(&mut Item, &mut Runtime) -> R) -> Option<R> {
        let item = self.items.iter_mut().find(|item| item.id() == id)?;
        Some(f(item, &mut self.runtime))
    }

    pub(super) fn active_ids(&self) -> Vec<ItemId> {
        self.active_items().map(|item| item.id().clone()).collect()
    }

    // Tickets

    fn issue(&mut self, responder: Responder) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.responders.insert(ticket, responder);
        ticket
    }

    /// Issues a ticket settled with one file.
    pub fn handle_ticket(&mut self) -> (Ticket, Pending<FileHandle>) {
        let (sender, receiver) = oneshot::channel();
        (self.issue(Responder::Handle(sender)), receiver)
    }

    /// Issues a ticket settled with several files.
    pub fn handles_ticket(&mut self) -> (Ticket, Pending<Vec<FileHandle>>) {
        let (sender, receiver) = oneshot::channel();
        (self.issue(Responder::Handles(sender)), receiver)
    }

    /// Issues a ticket settled with prepared output.
    pub fn output_ticket(&mut self) -> (Ticket, Pending<File>) {
        let (sender, receiver) = oneshot::channel();
        (self.issue(Responder::Output(sender)), receiver)
    }

    /// Resolves a ticket with the current snapshot of `id`.
    pub(super) fn resolve(&mut self, ticket: Option<Ticket>, id: &ItemId) {
        let Some(ticket) = ticket else {
            return;
        };
        let Some(handle) = self.find_item(id).map(Item::handle) else {
            self.reject(Some(ticket), Response::error(0, "Item not found"), None);
            return;
        };
        match self.responders.remove(&ticket) {
            Some(Responder::Handle(sender)) => deliver(sender, Ok(handle)),
            Some(Responder::Handles(sender)) => deliver(sender, Ok(vec![handle])),
            Some(Responder::Output(sender)) => deliver(sender, Ok(handle.file)),
            None => tracing::trace!(?ticket, "ticket already settled"),
        }
    }

    pub(super) fn resolve_output(&mut self, ticket: Option<Ticket>, file: File) {
        let Some(ticket) = ticket else {
            return;
        };
        match self.responders.remove(&ticket) {
            Some(Responder::Output(sender)) => deliver(sender, Ok(file)),
            Some(other) => {
                tracing::warn!(?ticket, "output delivered to a file ticket");
                self.responders.insert(ticket, other);
            }
            None => tracing::trace!(?ticket, "ticket already settled"),
        }
    }

    /// Rejects a ticket, attaching the snapshot of `id` when it still exists.
    pub(super) fn reject(&mut self, ticket: Option<Ticket>, error: Response, id: Option<&ItemId>) {
        let Some(ticket) = ticket else {
            return;
        };
        let failure = FileError {
            error,
            file: id.and_then(|id| self.find_item(id)).map(Item::handle),
        };
        match self.responders.remove(&ticket) {
            Some(Responder::Handle(sender)) => deliver(sender, Err(failure)),
            Some(Responder::Handles(sender)) => deliver(sender, Err(failure)),
            Some(Responder::Output(sender)) => deliver(sender, Err(failure)),
            None => tracing::trace!(?ticket, "ticket already settled"),
        }
    }

    /// Rejects every outstanding ticket.
    pub(super) fn reject_all(&mut self, error: &Response) {
        let tickets: Vec<Ticket> = self.responders.keys().copied().collect();
        for ticket in tickets {
            self.reject(Some(ticket), error.clone(), None);
        }
    }

    /// Settles an aggregate ticket once every part settled; the first
    /// failure in order rejects it.
    pub fn join(&mut self, ticket: Option<Ticket>, parts: Vec<Pending<FileHandle>>) {
        let Some(ticket) = ticket else {
            return;
        };
        let Some(Responder::Handles(sender)) = self.responders.remove(&ticket) else {
            tracing::warn!(?ticket, "join target is not an aggregate ticket");
            return;
        };

        let joined = async move {
            let mut handles = Vec::with_capacity(parts.len());
            for part in parts {
                match part.await {
                    Ok(Ok(handle)) => handles.push(handle),
                    Ok(Err(failure)) => return Err(failure),
                    Err(_) => return Err(FileError::detached(Response::abort())),
                }
            }
            Ok(handles)
        };
        if let Err(error) = self
            .pool
            .spawner()
            .spawn_local(async move { deliver(sender, joined.await) })
        {
            tracing::error!(%error, "failed to spawn result join");
        }
    }

    // Filters

    /// Starts a filter chain; `then` runs with its result during
    /// [`Store::settle`].
    pub(super) fn run_chain(&mut self, key: FilterKey, value: FilterValue, item: &ItemId, then: Continuation) {
        let ctx = FilterContext::new(self.find_item(item).map(Item::handle), self.options.clone());
        let chain = self.filters.apply_filter_chain(key, value, ctx);
        let finished = Rc::clone(&self.finished);
        let task = async move {
            let result = chain.await;
            finished.borrow_mut().push_back((then, result));
        };
        if let Err(error) = self.pool.spawner().spawn_local(task) {
            tracing::error!(%error, ?key, "failed to spawn filter chain");
        }
    }

    /// Runs every filter registered for `key` on the same input.
    pub(super) fn fan_out(&self, key: FilterKey, value: &FilterValue, item: Option<&ItemId>) -> Vec<FilterValue> {
        let ctx = FilterContext::new(
            item.and_then(|id| self.find_item(id)).map(Item::handle),
            self.options.clone(),
        );
        self.filters.apply_filters(key, value, &ctx)
    }

    /// Returns whether any filter registered for `key` answered `false`.
    pub(crate) fn vetoed(&self, key: FilterKey, value: &FilterValue, item: Option<&ItemId>) -> bool {
        self.fan_out(key, value, item)
            .iter()
            .any(|answer| answer.as_bool() == Some(false))
    }

    // Host loop

    /// Runs everything that is ready: item events, filter chains and their
    /// continuations, until nothing moves.
    pub fn settle(&mut self) {
        loop {
            let mut progressed = false;

            while let Some((id, event)) = self.runtime.next_event() {
                self.on_item_event(&id, event);
                progressed = true;
            }

            self.pool.run_until_stalled();
            let finished: Vec<(Continuation, FilterResult)> = self.finished.borrow_mut().drain(..).collect();
            for (then, result) in finished {
                self.resume(then, result);
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    /// Advances the virtual clock by `ms`, firing due timers in order, and
    /// returns the public events to deliver.
    pub fn advance(&mut self, ms: u64) -> Vec<PondEvent> {
        let until = self.runtime.now().saturating_add(ms);
        self.settle();
        while let Some(task) = self.runtime.pop_due(until) {
            self.run_timer(task);
            self.settle();
        }
        self.runtime.advance_to(until);
        self.take_events()
    }

    fn run_timer(&mut self, task: TimerTask) {
        let _span = tracing::debug_span!("timer", task = ?task).entered();
        match task {
            TimerTask::PerceivedProgress { item } => {
                self.with_any_item(&item, |item, rt| item.on_perceived_tick(rt));
            }
            TimerTask::RequestProcessing { item, ticket, attempt } => {
                self.dispatch(
                    Action::RequestItemProcessing {
                        id: item,
                        ticket,
                        attempt,
                    },
                    false,
                );
            }
            TimerTask::ListUpdated => {
                self.list_timer = None;
                let ids = self.active_ids();
                self.dispatch(Action::DidUpdateItems { ids }, false);
            }
            TimerTask::MetadataUpdated { item } => {
                self.metadata_timers.remove(&item);
                self.metadata_follow_up(&item);
            }
        }
    }

    /// Feeds a transport callback to whoever issued the request.
    pub fn on_transport(&mut self, id: RequestId, event: TransportEvent) {
        let Some(route) = self.runtime.route(id).cloned() else {
            tracing::debug!(%id, "event for unknown request dropped");
            return;
        };
        let _span = tracing::debug_span!("transport", %id, item = %route.item).entered();
        match route.channel {
            Channel::Remove => self.on_remove_response(id, event),
            channel => {
                self.with_any_item(&route.item, |item, rt| item.on_transport(id, channel, event, rt));
            }
        }
        self.settle();
    }

    /// Debounces the list-changed notification to the next tick.
    pub(super) fn list_updated(&mut self) {
        if let Some(timer) = self.list_timer.take() {
            self.runtime.cancel(timer);
        }
        self.list_timer = Some(self.runtime.schedule(0, TimerTask::ListUpdated));
    }
}

fn deliver<T>(sender: oneshot::Sender<T>, value: T) {
    if sender.send(value).is_err() {
        tracing::trace!("result receiver dropped before delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Source;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    fn store() -> Store {
        Store::new(Options::default(), Box::new(MemoryTransport::new()), Some(1)).expect("valid options")
    }

    #[test]
    fn blocking_actions_wait_for_drain() {
        let mut store = store();
        store.dispatch(Action::DidInit, true);
        assert!(store.take_actions().is_empty());
        assert!(store.is_idle());

        store.drain_deferred();
        assert_eq!(store.take_actions(), vec![Action::DidInit]);
    }

    #[test]
    fn events_are_held_until_advance() {
        let mut store = store();
        store.dispatch(Action::DidInit, false);
        assert!(!store.is_idle());

        let events = store.advance(0);
        assert_eq!(events.len(), 1);
        assert!(store.take_events().is_empty());
    }

    #[test]
    fn refused_option_acknowledges_previous_value() {
        let mut store = store();
        assert!(store.set_option("max_parallel_uploads", json!("lots")).is_err());
        assert_eq!(
            store.take_actions(),
            vec![Action::DidSetOption {
                name: "max_parallel_uploads".into(),
                value: json!(2),
            }]
        );
        assert_eq!(store.query_option("nope"), None);
    }

    #[test]
    fn unknown_ids_reject_tickets() {
        let mut store = store();
        let (ticket, mut pending) = store.handle_ticket();
        store.dispatch(
            Action::RequestRemoveItem {
                id: ItemId::from("ghost"),
                revert: false,
                ticket: Some(ticket),
            },
            false,
        );
        let failure = pending.try_recv().expect("settled").expect("sent").expect_err("rejected");
        assert_eq!(failure.error.text(), "Item not found");
    }

    #[test]
    fn native_file_is_added_and_loaded() {
        let mut store = store();
        let (ticket, mut pending) = store.handle_ticket();
        store.dispatch(
            Action::AddItem {
                request: AddRequest::new(Source::File(File::new("a.txt", b"abc".to_vec()))),
                ticket: Some(ticket),
            },
            false,
        );
        store.settle();

        let handle = pending.try_recv().expect("settled").expect("sent").expect("added");
        assert_eq!(handle.status, ItemStatus::Idle);
        assert_eq!(store.total_items(), 1);
    }
}
