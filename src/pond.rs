//! The embedder-facing instance.
//!
//! A [`Pond`] wraps one [`Store`] and exposes the public operation surface:
//! adding, removing, processing and preparing files, options, filters and
//! event listeners. Operations that complete later return a
//! [`Pending`] receiver that is always settled.
//!
//! The pond is host-driven. Nothing happens between calls unless the host
//! calls [`Pond::advance`] (time and event delivery),
//! [`Pond::on_transport`] (network callbacks) and [`Pond::frame`] (the view
//! layer contract).
//!
//! # Example
//!
//! ```rust
//! use filedrop::domain::{File, ItemStatus};
//! use filedrop::transport::MemoryTransport;
//! use filedrop::{Options, Pond};
//!
//! let mut pond = Pond::new(Options::default(), Box::new(MemoryTransport::new()), Some(7))?;
//! let mut added = pond.add_file(File::new("notes.txt", b"hello".to_vec()));
//! pond.advance(0);
//!
//! let handle = added.try_recv().ok().flatten().and_then(Result::ok).expect("file added");
//! assert_eq!(handle.status, ItemStatus::Idle);
//! # Ok::<(), filedrop::FiledropError>(())
//! ```

use std::fmt;
use std::future::Future;

use futures::channel::oneshot;
use serde_json::Value;

use crate::app::{Action, AddRequest, Comparator, OutputPurpose, Options, Outcome, Pending, PondEvent, Store};
use crate::domain::error::{FiledropError, Result};
use crate::domain::{File, FileError, ItemOrigin, ItemStatus, Source};
use crate::filter::{FilterContext, FilterKey, FilterResult, FilterValue};
use crate::item::{FileHandle, Item, ItemId};
use crate::transport::{RequestId, Response, Transport, TransportEvent};

type Listener = Box<dyn FnMut(&PondEvent)>;

/// One upload widget instance.
pub struct Pond {
    store: Store,
    listeners: Vec<Listener>,
}

impl fmt::Debug for Pond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pond")
            .field("store", &self.store)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

fn settled<T>(outcome: Outcome<T>) -> Pending<T> {
    let (sender, receiver) = oneshot::channel();
    // Fails only once the receiver is dropped, and it is still held here.
    let _ = sender.send(outcome);
    receiver
}

fn destroyed<T>() -> Pending<T> {
    settled(Err(FileError::detached(Response::abort())))
}

impl Pond {
    /// Creates a pond and announces `init`.
    ///
    /// A `seed` makes perceived upload progress reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`FiledropError::InvalidOption`] when `options` fail validation.
    pub fn new(options: Options, transport: Box<dyn Transport>, seed: Option<u64>) -> Result<Self> {
        let mut store = Store::new(options, transport, seed)?;
        store.dispatch(Action::DidInit, false);
        tracing::debug!("pond created");
        Ok(Self {
            store,
            listeners: Vec::new(),
        })
    }

    /// The underlying store, for queries the pond does not wrap.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    fn run(&mut self, action: Action) {
        self.store.dispatch(action, false);
        self.store.settle();
    }

    // Files

    /// Adds a file from any source.
    pub fn add_file(&mut self, source: impl Into<Source>) -> Pending<FileHandle> {
        self.add_file_with(AddRequest::new(source.into()))
    }

    /// Adds a file with an explicit index, origin or initial metadata.
    pub fn add_file_with(&mut self, request: AddRequest) -> Pending<FileHandle> {
        if self.store.is_destroyed() {
            return destroyed();
        }
        let (ticket, pending) = self.store.handle_ticket();
        self.run(Action::AddItem {
            request,
            ticket: Some(ticket),
        });
        pending
    }

    /// Adds several files at consecutive positions.
    ///
    /// Resolves with every added file in order, or rejects with the first
    /// failure. Ignored file names are skipped.
    pub fn add_files(&mut self, requests: Vec<AddRequest>) -> Pending<Vec<FileHandle>> {
        if self.store.is_destroyed() {
            return destroyed();
        }
        let (ticket, pending) = self.store.handles_ticket();
        self.run(Action::AddItems {
            requests,
            ticket: Some(ticket),
        });
        pending
    }

    /// Adds the candidates no `AllowHopperItem` filter refuses, as when
    /// files are dropped or pasted.
    pub fn accept_candidates(&mut self, sources: Vec<Source>) -> Pending<Vec<FileHandle>> {
        let accepted: Vec<AddRequest> = sources
            .into_iter()
            .filter(|source| {
                !self
                    .store
                    .vetoed(FilterKey::AllowHopperItem, &FilterValue::Source(source.clone()), None)
            })
            .map(AddRequest::new)
            .collect();
        tracing::debug!(accepted = accepted.len(), "hopper candidates filtered");
        self.add_files(accepted)
    }

    /// Removes a file, optionally reverting its upload first.
    pub fn remove_file(&mut self, id: &ItemId, revert: bool) -> Pending<FileHandle> {
        if self.store.is_destroyed() {
            return destroyed();
        }
        let (ticket, pending) = self.store.handle_ticket();
        self.run(Action::RequestRemoveItem {
            id: id.clone(),
            revert,
            ticket: Some(ticket),
        });
        pending
    }

    /// Removes the given files, or every file when `ids` is `None`.
    pub fn remove_files(&mut self, ids: Option<&[ItemId]>, revert: bool) -> Vec<Pending<FileHandle>> {
        let ids = ids.map_or_else(|| self.ids(), <[ItemId]>::to_vec);
        ids.iter().map(|id| self.remove_file(id, revert)).collect()
    }

    /// Snapshot of an active file.
    #[must_use]
    pub fn get_file(&self, id: &ItemId) -> Option<FileHandle> {
        self.store.item(id).map(Item::handle)
    }

    /// Snapshot of the active file at `index`.
    #[must_use]
    pub fn get_file_at(&self, index: usize) -> Option<FileHandle> {
        self.store.item_at(index).map(Item::handle)
    }

    /// Snapshots of every active file, in list order.
    #[must_use]
    pub fn get_files(&self) -> Vec<FileHandle> {
        self.store.active_items().map(Item::handle).collect()
    }

    fn ids(&self) -> Vec<ItemId> {
        self.store.active_items().map(|item| item.id().clone()).collect()
    }

    // Processing

    /// Uploads a file, correcting its state first when needed.
    pub fn process_file(&mut self, id: &ItemId) -> Pending<FileHandle> {
        if self.store.is_destroyed() {
            return destroyed();
        }
        let (ticket, pending) = self.store.handle_ticket();
        self.run(Action::RequestItemProcessing {
            id: id.clone(),
            ticket: Some(ticket),
            attempt: 0,
        });
        pending
    }

    /// Uploads the given files, or every file still waiting for an upload
    /// when `ids` is `None`.
    pub fn process_files(&mut self, ids: Option<&[ItemId]>) -> Pending<Vec<FileHandle>> {
        if self.store.is_destroyed() {
            return destroyed();
        }
        let ids = ids.map_or_else(
            || {
                self.store
                    .active_items()
                    .filter(|item| awaits_upload(item))
                    .map(|item| item.id().clone())
                    .collect()
            },
            <[ItemId]>::to_vec,
        );

        let parts: Vec<Pending<FileHandle>> = ids.iter().map(|id| self.process_file(id)).collect();
        let (ticket, pending) = self.store.handles_ticket();
        self.store.join(Some(ticket), parts);
        self.store.settle();
        pending
    }

    /// Runs the output filters over a file without uploading it.
    pub fn prepare_file(&mut self, id: &ItemId) -> Pending<File> {
        if self.store.is_destroyed() {
            return destroyed();
        }
        let (ticket, pending) = self.store.output_ticket();
        self.run(Action::RequestPrepareOutput {
            id: id.clone(),
            purpose: OutputPurpose::Caller(Some(ticket)),
        });
        pending
    }

    /// Aborts an upload; resolves once the abort was acknowledged.
    pub fn abort_processing(&mut self, id: &ItemId) -> Pending<FileHandle> {
        if self.store.is_destroyed() {
            return destroyed();
        }
        let (ticket, pending) = self.store.handle_ticket();
        self.run(Action::AbortItemProcessing {
            id: id.clone(),
            ticket: Some(ticket),
        });
        pending
    }

    /// Undoes an upload.
    pub fn revert_processing(&mut self, id: &ItemId) {
        self.run(Action::RequestRevertItemProcessing { id: id.clone() });
    }

    /// Retries a failed upload.
    pub fn retry_processing(&mut self, id: &ItemId) {
        self.run(Action::RetryItemProcessing { id: id.clone() });
    }

    // Loading and metadata

    /// Reloads a file whose load failed.
    pub fn retry_load(&mut self, id: &ItemId) {
        self.run(Action::RetryItemLoad { id: id.clone() });
    }

    /// Stops loading a file; the file is removed once the abort settles.
    ///
    /// # Errors
    ///
    /// - [`FiledropError::Destroyed`] after [`Pond::destroy`]
    /// - [`FiledropError::ItemNotFound`] for unknown ids
    pub fn abort_load(&mut self, id: &ItemId) -> Result<()> {
        self.ensure_item(id)?;
        self.run(Action::AbortItemLoad { id: id.clone() });
        Ok(())
    }

    /// Writes metadata at a dotted path.
    ///
    /// Silent writes change the value without triggering follow-ups such as
    /// a re-upload.
    ///
    /// # Errors
    ///
    /// - [`FiledropError::Destroyed`] after [`Pond::destroy`]
    /// - [`FiledropError::ItemNotFound`] for unknown ids
    pub fn set_metadata(&mut self, id: &ItemId, key: &str, value: Value, silent: bool) -> Result<()> {
        self.ensure_item(id)?;
        self.run(Action::SetItemMetadata {
            id: id.clone(),
            key: key.to_string(),
            value,
            silent,
        });
        Ok(())
    }

    fn ensure_item(&self, id: &ItemId) -> Result<()> {
        if self.store.is_destroyed() {
            return Err(FiledropError::Destroyed);
        }
        if self.store.item(id).is_none() {
            return Err(FiledropError::ItemNotFound(id.to_string()));
        }
        Ok(())
    }

    // Ordering

    /// Reorders the files with `compare`.
    pub fn sort(&mut self, compare: impl Fn(&FileHandle, &FileHandle) -> std::cmp::Ordering + 'static) {
        self.run(Action::Sort {
            compare: Comparator::new(compare),
        });
    }

    /// Moves a file to `index`, clamped to the list.
    ///
    /// # Errors
    ///
    /// - [`FiledropError::Destroyed`] after [`Pond::destroy`]
    /// - [`FiledropError::ItemNotFound`] for unknown ids
    pub fn move_file(&mut self, id: &ItemId, index: usize) -> Result<()> {
        self.ensure_item(id)?;
        self.run(Action::MoveItem { id: id.clone(), index });
        Ok(())
    }

    /// Marks a file as activated, e.g. clicked.
    pub fn activate_file(&mut self, id: &ItemId) {
        self.run(Action::ActivateItem { id: id.clone() });
    }

    // Options and filters

    /// Assigns an option by name; see [`Options::assign`].
    ///
    /// # Errors
    ///
    /// - [`FiledropError::Destroyed`] after [`Pond::destroy`]
    /// - [`FiledropError::UnknownOption`] and [`FiledropError::InvalidOption`]
    pub fn set_option(&mut self, name: &str, value: Value) -> Result<Value> {
        if self.store.is_destroyed() {
            return Err(FiledropError::Destroyed);
        }
        let result = self.store.set_option(name, value);
        self.store.settle();
        result
    }

    /// Reads an option by name; `None` for unknown names.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<Value> {
        self.store.query_option(name)
    }

    #[must_use]
    pub const fn options(&self) -> &Options {
        self.store.options()
    }

    /// Registers an asynchronous filter.
    pub fn add_filter<F, Fut>(&mut self, key: FilterKey, filter: F)
    where
        F: Fn(FilterValue, FilterContext) -> Fut + 'static,
        Fut: Future<Output = FilterResult> + 'static,
    {
        self.store.filters_mut().add_filter(key, filter);
    }

    /// Registers a filter that answers immediately.
    pub fn add_sync_filter<F>(&mut self, key: FilterKey, filter: F)
    where
        F: Fn(FilterValue, &FilterContext) -> FilterResult + 'static,
    {
        self.store.filters_mut().add_sync_filter(key, filter);
    }

    /// Subscribes to public events.
    pub fn on(&mut self, listener: impl FnMut(&PondEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Aborts everything, rejects every pending result and announces
    /// `destroy`. Later operations are refused.
    pub fn destroy(&mut self) {
        if self.store.is_destroyed() {
            return;
        }
        self.run(Action::Destroy);
    }

    // Host contract

    /// Advances the virtual clock by `ms` and delivers the public events
    /// raised so far to every listener. The events are returned as well.
    pub fn advance(&mut self, ms: u64) -> Vec<PondEvent> {
        let events = self.store.advance(ms);
        for event in &events {
            for listener in &mut self.listeners {
                listener(event);
            }
        }
        events
    }

    /// Feeds a transport callback for an in-flight request.
    pub fn on_transport(&mut self, id: RequestId, event: TransportEvent) {
        self.store.on_transport(id, event);
    }

    /// Takes the actions dispatched since the last call.
    pub fn take_actions(&mut self) -> Vec<Action> {
        self.store.take_actions()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.store.is_idle()
    }

    /// Re-dispatches deferred blocking actions.
    pub fn drain_deferred(&mut self) {
        self.store.drain_deferred();
    }

    /// One view-layer frame: takes the frame's actions and, when the view is
    /// resting and nothing else waits, drains deferred actions.
    pub fn frame(&mut self, resting: bool) -> Vec<Action> {
        let actions = self.store.take_actions();
        if resting && self.store.is_idle() {
            self.store.drain_deferred();
        }
        actions
    }

    /// Current virtual time in milliseconds.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.store.now()
    }
}

/// Files `process_files` picks up by default: not uploaded, not uploading,
/// and not a persisted server file at rest.
fn awaits_upload(item: &Item) -> bool {
    !(item.status() == ItemStatus::Idle && item.origin() == ItemOrigin::Local)
        && !matches!(
            item.status(),
            ItemStatus::Processing | ItemStatus::ProcessingComplete | ItemStatus::ProcessingRevertError
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EventKind;
    use crate::transport::{MemoryTransport, MockTransport, RequestKind, ServerConfig};
    use mockall::predicate::eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn server_options() -> Options {
        Options {
            server: Some(ServerConfig::from_url("https://uploads.test/")),
            instant_upload: false,
            ..Options::default()
        }
    }

    #[test]
    fn upload_and_abort_reach_the_transport() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|_, request| request.kind == RequestKind::Process && request.url == "https://uploads.test/")
            .times(1)
            .returning(|_, _| ());
        transport.expect_abort().with(eq(RequestId(1))).times(1).returning(|_| ());

        let mut pond = Pond::new(server_options(), Box::new(transport), Some(1)).expect("valid options");
        pond.add_file(File::new("a.txt", b"abc".to_vec()));
        let id = pond.get_file_at(0).expect("added").id;

        pond.process_file(&id);
        pond.advance(0);
        pond.frame(true);
        assert_eq!(pond.get_file(&id).map(|file| file.status), Some(ItemStatus::Processing));

        pond.abort_processing(&id);
        assert_eq!(pond.get_file(&id).map(|file| file.status), Some(ItemStatus::Idle));
    }

    #[test]
    fn listeners_see_events_in_dispatch_order() {
        let mut pond = Pond::new(Options::default(), Box::new(MemoryTransport::new()), None).expect("valid options");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        pond.on(move |event| log.borrow_mut().push(event.kind));

        pond.add_file(File::new("a.txt", b"abc".to_vec()));
        let returned: Vec<EventKind> = pond.advance(0).into_iter().map(|event| event.kind).collect();

        assert_eq!(
            returned,
            vec![
                EventKind::Init,
                EventKind::AddFileStart,
                EventKind::AddFile,
                EventKind::UpdateFiles
            ]
        );
        assert_eq!(*seen.borrow(), returned);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut pond = Pond::new(Options::default(), Box::new(MemoryTransport::new()), None).expect("valid options");
        let ghost = ItemId::from("ghost");

        assert!(matches!(pond.abort_load(&ghost), Err(FiledropError::ItemNotFound(_))));
        assert!(matches!(pond.move_file(&ghost, 0), Err(FiledropError::ItemNotFound(_))));
        let mut removed = pond.remove_file(&ghost, false);
        assert!(matches!(removed.try_recv(), Ok(Some(Err(_)))));
    }

    #[test]
    fn prepare_file_runs_output_filters() {
        let mut pond = Pond::new(Options::default(), Box::new(MemoryTransport::new()), None).expect("valid options");
        pond.add_sync_filter(FilterKey::PrepareOutput, |value, _| {
            let mut file = value.into_file().ok_or_else(|| crate::filter::FilterError::new("expected a file"))?;
            file.name = format!("prepared-{}", file.name);
            Ok(FilterValue::File(file))
        });
        pond.add_file(File::new("a.txt", b"abc".to_vec()));
        let id = pond.get_file_at(0).expect("added").id;

        let mut prepared = pond.prepare_file(&id);
        let file = prepared.try_recv().ok().flatten().expect("settled").expect("prepared");
        assert_eq!(file.name, "prepared-a.txt");
        assert_eq!(pond.get_file(&id).map(|handle| handle.file.name), Some("a.txt".to_string()));
    }

    #[test]
    fn abort_all_rejects_running_and_queued_uploads() {
        let net = MemoryTransport::new();
        let options = Options {
            allow_multiple: true,
            max_parallel_uploads: 1,
            ..server_options()
        };
        let mut pond = Pond::new(options, Box::new(net.clone()), Some(2)).expect("valid options");
        pond.add_file(File::new("a.txt", b"abc".to_vec()));
        pond.add_file(File::new("b.txt", b"def".to_vec()));
        let ids: Vec<ItemId> = pond.get_files().into_iter().map(|file| file.id).collect();

        let mut running = pond.process_file(&ids[0]);
        let mut queued = pond.process_file(&ids[1]);
        pond.advance(0);
        pond.frame(true);
        let upload = net.ids_of(RequestKind::Process);
        assert_eq!(upload.len(), 1);

        pond.run(Action::AbortAll);

        for pending in [&mut running, &mut queued] {
            let failure = pending.try_recv().ok().flatten().expect("settled").expect_err("aborted");
            assert_eq!(failure.error.kind, crate::transport::ResponseKind::Abort);
        }
        assert_eq!(net.aborted(), upload);
        pond.advance(0);
        pond.frame(true);
        assert_eq!(net.ids_of(RequestKind::Process).len(), 1, "queue was emptied");
    }
}
