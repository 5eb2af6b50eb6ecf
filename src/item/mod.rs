//! Per-file state machine.
//!
//! An [`Item`] owns one [`Loader`] and one [`Processor`] and is the only
//! writer of its own status. It never reaches into the store: every outcome
//! is published as an [`ItemEvent`] on the runtime channel, and the store
//! turns those into actions.
//!
//! # Architecture
//!
//! - `loader`: Source resolution (native file, data URI, URL)
//! - `processor`: Upload with perceived-progress smoothing
//! - `events`: The typed event channel payload
//! - `handle`: Read-only snapshots handed to embedders
//!
//! Operations that complete later (revert, abort processing) return a
//! [`Settlement`]; when it is `Pending` the outcome arrives as an event.

pub mod events;
pub mod handle;
pub mod loader;
pub mod processor;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{File, ItemOrigin, ItemStatus, Metadata, Source};
use crate::infrastructure::{Channel, Runtime};
use crate::transport::{Request, RequestId, Response, ResponseMapping, ServerConfig, TransportEvent};

pub use events::ItemEvent;
pub use handle::FileHandle;
pub use loader::{Loader, LoaderEvent};
pub use processor::{Processor, ProcessorEvent};

/// Opaque, never reused item identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Whether an operation finished on the spot or reports back through an
/// [`ItemEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Settled,
    Pending,
}

#[derive(Debug, Clone, Copy)]
struct RevertInFlight {
    request: RequestId,
    force: bool,
}

/// One file tracked by the store.
#[derive(Debug)]
pub struct Item {
    id: ItemId,
    origin: ItemOrigin,
    status: ItemStatus,
    file: File,
    source: Source,
    server_ref: Option<String>,
    pending_ref: Option<String>,
    metadata: Metadata,
    archived: bool,
    frozen: bool,
    released: bool,
    loader: Loader,
    processor: Processor,
    revert: Option<RevertInFlight>,
    load_progress: Option<f64>,
    process_progress: Option<f64>,
    error: Option<Response>,
}

impl Item {
    /// Creates an item for `source`.
    ///
    /// Limbo and local items start out knowing their server reference: the
    /// source itself.
    #[must_use]
    pub fn new(id: ItemId, source: Source, origin: ItemOrigin) -> Self {
        let server_ref = match origin {
            ItemOrigin::Input => None,
            ItemOrigin::Limbo | ItemOrigin::Local => source.as_reference().map(str::to_string),
        };

        Self {
            file: File::stub(&source),
            id,
            origin,
            status: ItemStatus::Init,
            source,
            server_ref,
            pending_ref: None,
            metadata: Metadata::new(),
            archived: false,
            frozen: false,
            released: false,
            loader: Loader::default(),
            processor: Processor::default(),
            revert: None,
            load_progress: None,
            process_progress: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ItemId {
        &self.id
    }

    #[must_use]
    pub const fn status(&self) -> ItemStatus {
        self.status
    }

    #[must_use]
    pub const fn origin(&self) -> ItemOrigin {
        self.origin
    }

    /// Switches origin, e.g. a local file that was re-uploaded into limbo.
    pub fn set_origin(&mut self, origin: ItemOrigin) {
        self.origin = origin;
    }

    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    #[must_use]
    pub const fn source(&self) -> &Source {
        &self.source
    }

    #[must_use]
    pub fn server_ref(&self) -> Option<&str> {
        self.server_ref.as_deref()
    }

    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub const fn is_archived(&self) -> bool {
        self.archived
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    #[must_use]
    pub const fn load_progress(&self) -> Option<f64> {
        self.load_progress
    }

    #[must_use]
    pub const fn process_progress(&self) -> Option<f64> {
        self.process_progress
    }

    /// The last load or processing error, if the item is in an error state.
    #[must_use]
    pub const fn error(&self) -> Option<&Response> {
        self.error.as_ref()
    }

    /// Snapshot for embedders.
    #[must_use]
    pub fn handle(&self) -> FileHandle {
        FileHandle {
            id: self.id.clone(),
            server_id: self.server_ref.clone(),
            origin: self.origin,
            status: self.status,
            file: self.file.clone(),
            source: self.source.clone(),
            metadata: self.metadata.clone(),
            archived: self.archived,
        }
    }

    fn set_status(&mut self, next: ItemStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(item = %self.id, from = ?self.status, to = ?next, "refusing status transition");
            return false;
        }
        tracing::debug!(item = %self.id, from = ?self.status, to = ?next, "status transition");
        self.status = next;
        true
    }

    fn emit(&self, rt: &mut Runtime, event: ItemEvent) {
        if self.frozen {
            tracing::trace!(item = %self.id, ?event, "frozen item dropped event");
            return;
        }
        rt.emit(&self.id, event);
    }

    // Loading

    /// Starts loading the source. `request` is the fetch strategy for URLs.
    pub fn load(&mut self, request: Option<Request>, rt: &mut Runtime) {
        if !self.set_status(ItemStatus::Loading) {
            return;
        }
        self.error = None;
        self.load_progress = None;
        let events = self.loader.load(&self.id, &self.source, request, rt);
        self.apply_loader_events(events, rt);
    }

    /// Aborts loading. An item that is not fetching anything returns to
    /// `Init` directly.
    pub fn abort_load(&mut self, rt: &mut Runtime) {
        let events = self.loader.abort(rt);
        if events.is_empty() {
            if matches!(self.status, ItemStatus::Loading | ItemStatus::LoadError) && self.set_status(ItemStatus::Init) {
                self.emit(rt, ItemEvent::LoadAbort);
            }
            return;
        }
        self.apply_loader_events(events, rt);
    }

    /// Accepts the file produced by the loader once load filters passed.
    pub fn complete_load(&mut self, file: File, rt: &mut Runtime) {
        if self.status != ItemStatus::Loading {
            tracing::debug!(item = %self.id, status = ?self.status, "late load result ignored");
            return;
        }
        self.file = file;
        if let Some(reference) = self.pending_ref.take() {
            self.origin = ItemOrigin::Limbo;
            self.server_ref = Some(reference);
        }

        let next = if self.origin == ItemOrigin::Limbo && self.server_ref.is_some() {
            ItemStatus::ProcessingComplete
        } else {
            ItemStatus::Idle
        };
        if self.set_status(next) {
            self.load_progress = Some(1.0);
            self.emit(rt, ItemEvent::Load);
        }
    }

    /// Rejects the loaded file, e.g. because a load filter refused it.
    pub fn fail_load(&mut self, error: Response, rt: &mut Runtime) {
        if self.set_status(ItemStatus::LoadError) {
            self.error = Some(error.clone());
            self.emit(rt, ItemEvent::LoadFileError(error));
        }
    }

    fn apply_loader_events(&mut self, events: Vec<LoaderEvent>, rt: &mut Runtime) {
        for event in events {
            match event {
                LoaderEvent::Init => self.emit(rt, ItemEvent::LoadInit),
                LoaderEvent::Meta(info) => {
                    if let Some(name) = info.name {
                        self.file.name = name;
                    }
                    if info.size.is_some() {
                        self.file.size = info.size;
                    }
                    if info.source.is_some() {
                        self.pending_ref = info.source;
                    }
                    self.emit(rt, ItemEvent::LoadMeta);
                }
                LoaderEvent::Progress(progress) => {
                    self.load_progress = progress;
                    self.emit(rt, ItemEvent::LoadProgress(progress));
                }
                LoaderEvent::Load { file, info } => {
                    if info.source.is_some() {
                        self.pending_ref = info.source;
                    }
                    self.emit(rt, ItemEvent::LoadReady(file));
                }
                LoaderEvent::Error(error) => {
                    if self.set_status(ItemStatus::LoadError) {
                        self.error = Some(error.clone());
                        self.emit(rt, ItemEvent::LoadRequestError(error));
                    }
                }
                LoaderEvent::Abort => {
                    if self.set_status(ItemStatus::Init) {
                        self.emit(rt, ItemEvent::LoadAbort);
                    }
                }
            }
        }
    }

    // Processing

    /// Moves an idle or failed item into the processing queue.
    pub fn request_processing(&mut self) -> bool {
        let queued = self.set_status(ItemStatus::ProcessingQueued);
        if queued {
            self.error = None;
            self.process_progress = None;
        }
        queued
    }

    /// Claims an upload slot; output preparation starts now.
    pub fn begin_processing(&mut self, rt: &mut Runtime) -> bool {
        if !self.set_status(ItemStatus::Processing) {
            return false;
        }
        self.processor.prepare(rt);
        true
    }

    /// Sends the prepared output.
    pub fn process(
        &mut self,
        request: Option<Request>,
        mapping: (ResponseMapping, ResponseMapping),
        perceived: bool,
        rt: &mut Runtime,
    ) {
        let events = self.processor.process(&self.id, request, mapping, perceived, rt);
        self.apply_processor_events(events, rt);
    }

    /// Fails processing before a request was sent, e.g. when output
    /// preparation was rejected.
    pub fn fail_processing(&mut self, error: Response, rt: &mut Runtime) {
        let events = self.processor.abort(rt);
        if events.is_empty() && self.status != ItemStatus::Processing {
            return;
        }
        if self.set_status(ItemStatus::ProcessingError) {
            self.error = Some(error.clone());
            self.emit(rt, ItemEvent::ProcessError(error));
        }
    }

    /// Aborts processing or leaves the queue.
    ///
    /// `Pending` means a `ProcessAbort` event will acknowledge the abort.
    pub fn abort_processing(&mut self, rt: &mut Runtime) -> Settlement {
        if self.processor.is_active() {
            let events = self.processor.abort(rt);
            self.apply_processor_events(events, rt);
            return Settlement::Pending;
        }
        if self.status == ItemStatus::ProcessingQueued && self.set_status(ItemStatus::Idle) {
            self.emit(rt, ItemEvent::ProcessAbort);
            return Settlement::Pending;
        }
        Settlement::Settled
    }

    /// Returns whether the processor is preparing or uploading.
    #[must_use]
    pub const fn is_processing(&self) -> bool {
        self.processor.is_active()
    }

    /// Advances perceived upload progress.
    pub fn on_perceived_tick(&mut self, rt: &mut Runtime) {
        let events = self.processor.on_tick(&self.id, rt);
        self.apply_processor_events(events, rt);
    }

    fn apply_processor_events(&mut self, events: Vec<ProcessorEvent>, rt: &mut Runtime) {
        for event in events {
            match event {
                ProcessorEvent::Start => self.emit(rt, ItemEvent::ProcessStart),
                ProcessorEvent::Progress(progress) => {
                    self.process_progress = progress;
                    self.emit(rt, ItemEvent::ProcessProgress(progress));
                }
                ProcessorEvent::Load(server_id) => {
                    tracing::debug!(item = %self.id, %server_id, "server accepted upload");
                }
                ProcessorEvent::LoadPerceived(server_id) => {
                    if self.set_status(ItemStatus::ProcessingComplete) {
                        self.server_ref = Some(server_id.clone());
                        self.process_progress = Some(1.0);
                        self.emit(rt, ItemEvent::ProcessComplete(server_id));
                    }
                }
                ProcessorEvent::Error(error) => {
                    if self.set_status(ItemStatus::ProcessingError) {
                        self.error = Some(error.clone());
                        self.emit(rt, ItemEvent::ProcessError(error));
                    }
                }
                ProcessorEvent::Abort => {
                    if self.set_status(ItemStatus::Idle) {
                        self.process_progress = None;
                        self.emit(rt, ItemEvent::ProcessAbort);
                    }
                }
            }
        }
    }

    // Revert

    /// Undoes the upload on the server.
    ///
    /// Without a server reference there is nothing to undo. Without a revert
    /// endpoint the revert succeeds locally. Otherwise the outcome arrives as
    /// `ProcessRevert` or, only when `force` is set, `ProcessRevertError`; an
    /// unforced failure counts as success.
    pub fn revert(&mut self, server: Option<&ServerConfig>, force: bool, rt: &mut Runtime) -> Settlement {
        let Some(reference) = self.server_ref.clone() else {
            return Settlement::Settled;
        };
        if let Some(revert) = &mut self.revert {
            revert.force |= force;
            return Settlement::Pending;
        }

        match server.and_then(|s| s.revert_request(&reference)) {
            Some(request) => {
                let request = rt.send(&self.id, Channel::Revert, request);
                self.revert = Some(RevertInFlight { request, force });
            }
            None => self.reverted(rt),
        }
        Settlement::Pending
    }

    fn reverted(&mut self, rt: &mut Runtime) {
        self.server_ref = None;
        self.process_progress = None;
        self.error = None;
        self.set_status(ItemStatus::Idle);
        self.emit(rt, ItemEvent::ProcessRevert);
    }

    fn on_revert_event(&mut self, id: RequestId, event: TransportEvent, rt: &mut Runtime) {
        let Some(revert) = self.revert.filter(|r| r.request == id) else {
            return;
        };
        let error = match event {
            TransportEvent::Headers(_) | TransportEvent::Progress { .. } => return,
            TransportEvent::Load(_) => None,
            TransportEvent::Error(response) => Some(response),
            TransportEvent::Timeout => Some(Response::error(0, "Request timed out")),
            TransportEvent::Abort => Some(Response::abort()),
        };
        rt.finish(id);
        self.revert = None;

        match error {
            None => self.reverted(rt),
            Some(error) if revert.force => {
                self.set_status(ItemStatus::ProcessingRevertError);
                self.error = Some(error.clone());
                self.emit(rt, ItemEvent::ProcessRevertError(error));
            }
            Some(error) => {
                tracing::warn!(item = %self.id, code = error.code, "revert failed, continuing");
                self.reverted(rt);
            }
        }
    }

    // Transport

    /// Routes a transport callback to the loader, processor or revert.
    pub fn on_transport(&mut self, id: RequestId, channel: Channel, event: TransportEvent, rt: &mut Runtime) {
        match channel {
            Channel::Loader => {
                let events = self.loader.on_transport(id, event, rt);
                self.apply_loader_events(events, rt);
            }
            Channel::Processor => {
                let events = self.processor.on_transport(id, event, rt);
                self.apply_processor_events(events, rt);
            }
            Channel::Revert => self.on_revert_event(id, event, rt),
            Channel::Remove => {
                tracing::debug!(item = %self.id, %id, "remove responses are handled by the store");
            }
        }
    }

    // Metadata and lifecycle flags

    /// Writes metadata, publishing a change unless the value is unchanged.
    pub fn set_metadata(&mut self, path: &str, value: Value, silent: bool, rt: &mut Runtime) {
        if let Some(change) = self.metadata.set(path, value, silent) {
            self.emit(rt, ItemEvent::MetadataUpdate(change));
        }
    }

    /// Soft-deletes the item: it leaves every active query but stays
    /// addressable until released.
    pub fn archive(&mut self) {
        self.archived = true;
    }

    /// Stops event emission.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Detaches the item so it can be dropped from the collection.
    ///
    /// An unforced revert keeps running on the host; nobody listens for it.
    pub fn release(&mut self, rt: &mut Runtime) {
        self.processor.reset(rt);
        self.loader.abort(rt);
        if let Some(revert) = self.revert.take() {
            if revert.force {
                rt.abort(revert.request);
            } else {
                rt.finish(revert.request);
            }
        }
        self.released = true;
        self.frozen = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn setup(source: Source, origin: ItemOrigin) -> (MemoryTransport, Runtime, Item) {
        let journal = MemoryTransport::new();
        let rt = Runtime::new(Box::new(journal.clone()), Some(9));
        (journal, rt, Item::new(ItemId::from("item"), source, origin))
    }

    fn restored_item() -> (MemoryTransport, Runtime, Item) {
        let (journal, mut rt, mut item) = setup(Source::parse("tmp-1"), ItemOrigin::Limbo);
        item.load(Some(Request::restore("/api?restore=tmp-1")), &mut rt);
        item.complete_load(File::new("a", Vec::new()), &mut rt);
        assert_eq!(item.status(), ItemStatus::ProcessingComplete);
        drain(&mut rt);
        (journal, rt, item)
    }

    fn drain(rt: &mut Runtime) -> Vec<ItemEvent> {
        std::iter::from_fn(|| rt.next_event().map(|(_, e)| e)).collect()
    }

    #[test]
    fn native_file_reaches_idle_after_complete_load() {
        let file = File::new("a.txt", b"abc".to_vec());
        let (_, mut rt, mut item) = setup(Source::File(file.clone()), ItemOrigin::Input);

        item.load(None, &mut rt);
        assert_eq!(item.status(), ItemStatus::Loading);
        assert_eq!(drain(&mut rt), vec![ItemEvent::LoadInit, ItemEvent::LoadReady(file.clone())]);

        item.complete_load(file, &mut rt);
        assert_eq!(item.status(), ItemStatus::Idle);
        assert_eq!(drain(&mut rt), vec![ItemEvent::Load]);
    }

    #[test]
    fn limbo_item_loads_into_processing_complete() {
        let (journal, mut rt, mut item) = setup(Source::parse("tmp-12"), ItemOrigin::Limbo);
        let server = ServerConfig::from_url("/api");

        item.load(server.get_request(crate::transport::RequestKind::Restore, "tmp-12"), &mut rt);
        let (id, _) = journal.take_sent().remove(0);
        item.on_transport(id, Channel::Loader, TransportEvent::Load(Response::load(200, "data")), &mut rt);
        let ready = drain(&mut rt).into_iter().find_map(|e| match e {
            ItemEvent::LoadReady(file) => Some(file),
            _ => None,
        });

        item.complete_load(ready.expect("file loaded"), &mut rt);
        assert_eq!(item.status(), ItemStatus::ProcessingComplete);
        assert_eq!(item.server_ref(), Some("tmp-12"));
    }

    #[test]
    fn transfer_id_header_moves_input_into_limbo() {
        let (journal, mut rt, mut item) = setup(Source::parse("https://x.test/a.png"), ItemOrigin::Input);
        item.load(Some(Request::fetch("https://x.test/a.png")), &mut rt);
        let (id, _) = journal.take_sent().remove(0);

        item.on_transport(
            id,
            Channel::Loader,
            TransportEvent::Headers(crate::transport::Headers::parse("X-Content-Transfer-Id: srv-5")),
            &mut rt,
        );
        assert_eq!(item.server_ref(), None, "reference applies at load");

        item.on_transport(id, Channel::Loader, TransportEvent::Load(Response::load(200, "png")), &mut rt);
        let file = item.file().clone();
        item.complete_load(file, &mut rt);

        assert_eq!(item.origin(), ItemOrigin::Limbo);
        assert_eq!(item.server_ref(), Some("srv-5"));
        assert_eq!(item.status(), ItemStatus::ProcessingComplete);
    }

    #[test]
    fn unforced_revert_failure_still_succeeds() {
        let (journal, mut rt, mut item) = restored_item();

        let server = ServerConfig::from_url("/api");
        assert_eq!(item.revert(Some(&server), false, &mut rt), Settlement::Pending);
        assert_eq!(item.status(), ItemStatus::ProcessingComplete, "status holds while in flight");

        let (id, _) = journal.take_sent().pop().expect("revert sent");
        item.on_transport(id, Channel::Revert, TransportEvent::Error(Response::error(500, "down")), &mut rt);

        assert_eq!(item.status(), ItemStatus::Idle);
        assert_eq!(item.server_ref(), None);
        assert_eq!(drain(&mut rt), vec![ItemEvent::ProcessRevert]);
    }

    #[test]
    fn forced_revert_failure_is_surfaced() {
        let (journal, mut rt, mut item) = restored_item();

        item.revert(Some(&ServerConfig::from_url("/api")), true, &mut rt);
        let (id, _) = journal.take_sent().pop().expect("revert sent");
        item.on_transport(id, Channel::Revert, TransportEvent::Error(Response::error(500, "down")), &mut rt);

        assert_eq!(item.status(), ItemStatus::ProcessingRevertError);
        assert_eq!(item.server_ref(), Some("tmp-1"));
        assert_eq!(drain(&mut rt), vec![ItemEvent::ProcessRevertError(Response::error(500, "down"))]);
    }

    #[test]
    fn revert_without_reference_settles_at_once() {
        let (_, mut rt, mut item) = setup(Source::File(File::new("a", Vec::new())), ItemOrigin::Input);
        assert_eq!(item.revert(None, true, &mut rt), Settlement::Settled);
        assert!(drain(&mut rt).is_empty());
    }

    #[test]
    fn frozen_items_stay_silent() {
        let (_, mut rt, mut item) = setup(Source::File(File::new("a", Vec::new())), ItemOrigin::Input);
        item.freeze();
        item.load(None, &mut rt);
        assert!(drain(&mut rt).is_empty());
        assert_eq!(item.status(), ItemStatus::Loading);
    }
}
