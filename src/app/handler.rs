//! Action handlers.
//!
//! [`Store::handle`] runs the business logic of every request action. A
//! handler mutates the collection, drives items through the runtime and
//! dispatches follow-up actions; it never waits. Outcomes that arrive later
//! are picked up in the `lifecycle` module.
//!
//! Most notifications need no handling: they are recorded for the view
//! layer and translated into public events by the store.

use super::actions::{Action, AddRequest, Comparator, OutputPurpose, Ticket};
use super::options::InsertLocation;
use super::store::{Continuation, Store};
use crate::domain::{ItemOrigin, ItemStatus, Source};
use crate::filter::{FilterKey, FilterValue};
use crate::infrastructure::{Channel, TimerTask};
use crate::item::{Item, ItemId, Settlement};
use crate::transport::{Request, RequestId, RequestKind, Response};

/// Attempts a processing request makes while the item is busy.
pub(super) const MAX_PROCESSING_ATTEMPTS: u32 = 100;
/// Delay between two attempts.
pub(super) const PROCESSING_POLL_MS: u64 = 32;

impl Store {
    /// Runs the handler of `action`.
    #[allow(clippy::too_many_lines)]
    pub(super) fn handle(&mut self, action: &Action) {
        let _span = tracing::debug_span!("handle", action = action.name()).entered();

        match action {
            Action::AddItem { request, ticket } => self.add_item(request.clone(), *ticket),
            Action::AddItems { requests, ticket } => self.add_items(requests, *ticket),
            Action::CompleteLoadItem { id } => self.complete_load_item(id),
            Action::RequestRemoveItem { id, revert, ticket } => self.request_remove_item(id, *revert, *ticket),
            Action::RemoveItem { id, revert, ticket } => self.remove_item(id, *revert, *ticket),
            Action::ReleaseItem { id } => self.release_item(id),
            Action::RequestItemProcessing { id, ticket, attempt } => {
                self.request_item_processing(id, *ticket, *attempt);
            }
            Action::ProcessItem { id } => self.process_item(id),
            Action::RetryItemProcessing { id } => self.dispatch(
                Action::RequestItemProcessing {
                    id: id.clone(),
                    ticket: None,
                    attempt: 0,
                },
                false,
            ),
            Action::AbortItemProcessing { id, ticket } => self.abort_item_processing(id, *ticket),
            Action::RequestRevertItemProcessing { id } => self.request_revert(id),
            Action::RevertItemProcessing { id } => self.revert_item_processing(id),
            Action::AbortItemLoad { id } => {
                self.with_item(id, |item, rt| item.abort_load(rt));
            }
            Action::RetryItemLoad { id } => self.retry_load(id),
            Action::AbortAll => self.abort_all(),
            Action::Sort { compare } => self.sort(compare),
            Action::MoveItem { id, index } => self.move_item(id, *index),
            Action::ActivateItem { id } => {
                if self.item(id).is_some() {
                    self.dispatch(Action::DidActivateItem { id: id.clone() }, false);
                }
            }
            Action::SetItemMetadata { id, key, value, silent } => {
                self.with_item(id, |item, rt| item.set_metadata(key, value.clone(), *silent, rt));
            }
            Action::RequestPrepareOutput { id, purpose } => self.request_prepare_output(id, *purpose),
            Action::SetOption { name, value } => {
                if let Err(error) = self.set_option(name, value.clone()) {
                    tracing::warn!(%name, %error, "option not applied");
                }
            }
            Action::Destroy => self.destroy(),

            Action::DidRemoveItem { id } => self.dispatch(Action::ReleaseItem { id: id.clone() }, true),
            Action::DidUpdateItemMetadata { id, change } => {
                if !change.silent {
                    self.schedule_metadata_follow_up(id);
                }
            }
            Action::DidInit
            | Action::DidSetOption { .. }
            | Action::DidThrowMaxFiles { .. }
            | Action::DidAddItem { .. }
            | Action::DidStartItemLoad { .. }
            | Action::DidUpdateItemMeta { .. }
            | Action::DidUpdateItemLoadProgress { .. }
            | Action::DidThrowItemInvalid { .. }
            | Action::DidThrowItemLoadError { .. }
            | Action::DidLoadItem { .. }
            | Action::DidLoadLocalItem { .. }
            | Action::DidPrepareOutput { .. }
            | Action::DidRequestItemProcessing { .. }
            | Action::DidStartItemProcessing { .. }
            | Action::DidUpdateItemProcessProgress { .. }
            | Action::DidCompleteItemProcessing { .. }
            | Action::DidThrowItemProcessingError { .. }
            | Action::DidAbortItemProcessing { .. }
            | Action::DidRevertItemProcessing { .. }
            | Action::DidThrowItemProcessingRevertError { .. }
            | Action::DidCompleteItemProcessingAll
            | Action::DidDefineValue { .. }
            | Action::DidStartItemRemove { .. }
            | Action::DidThrowItemRemoveError { .. }
            | Action::DidUpdateItems { .. }
            | Action::DidActivateItem { .. }
            | Action::DidSortItems
            | Action::DidDestroy => {}
        }
    }

    // Adding

    fn add_item(&mut self, request: AddRequest, ticket: Option<Ticket>) {
        if request.source.is_empty() {
            self.reject(ticket, Response::error(0, "No source"), None);
            return;
        }
        if self.is_ignored(&request.source) {
            tracing::debug!("ignored file skipped");
            self.reject(ticket, Response::warning(0, "Ignored file"), None);
            return;
        }

        if !self.has_room(1) {
            if self.options.allow_multiple || !self.options.allow_replace {
                self.throw_max_files(&request.source, ticket);
                return;
            }
            if !self.replace_first(&request, ticket) {
                return;
            }
        }

        let id = ItemId::generate();
        let mut item = Item::new(id.clone(), request.source.clone(), request.origin);
        for (key, value) in request.metadata.as_map() {
            item.set_metadata(key, value.clone(), true, &mut self.runtime);
        }

        let active = self.total_items();
        let index = match (self.options.item_insert_location_freedom, request.index) {
            (true, Some(index)) => index.min(active),
            _ => match self.options.item_insert_location {
                InsertLocation::Before => 0,
                InsertLocation::After => active,
            },
        };
        let position = self.raw_index(index);
        self.items.insert(position, item);
        if let Some(ticket) = ticket {
            self.add_tickets.insert(id.clone(), ticket);
        }
        tracing::debug!(item = %id, index, origin = ?request.origin, "item created");

        let created = self.item(&id).map(Item::handle).map(FilterValue::Item);
        if let Some(created) = created {
            let answers = self.fan_out(FilterKey::DidCreateItem, &created, Some(&id));
            tracing::trace!(answers = answers.len(), "create filters notified");
        }

        self.dispatch(Action::DidAddItem { id: id.clone(), index }, false);
        self.list_updated();

        let load = self.load_request(&request.source, request.origin);
        self.with_item(&id, |item, rt| item.load(load, rt));
    }

    fn add_items(&mut self, requests: &[AddRequest], ticket: Option<Ticket>) {
        let mut accepted: Vec<AddRequest> = requests
            .iter()
            .filter(|request| !request.source.is_empty() && !self.is_ignored(&request.source))
            .cloned()
            .collect();
        if !self.options.allow_multiple {
            accepted.truncate(1);
        }
        if accepted.len() > 1 && !self.has_room(accepted.len()) {
            self.throw_max_files(&accepted[0].source, ticket);
            return;
        }

        let total = self.total_items();
        let base = accepted
            .first()
            .and_then(|request| request.index)
            .map_or_else(
                || match self.options.item_insert_location {
                    InsertLocation::Before => 0,
                    InsertLocation::After => total,
                },
                |index| index.min(total),
            );

        let mut parts = Vec::with_capacity(accepted.len());
        for (offset, request) in accepted.into_iter().enumerate() {
            let (child, pending) = self.handle_ticket();
            parts.push(pending);
            self.dispatch(
                Action::AddItem {
                    request: request.at(base.saturating_add(offset)),
                    ticket: Some(child),
                },
                false,
            );
        }
        self.join(ticket, parts);
    }

    fn is_ignored(&self, source: &Source) -> bool {
        let Source::File(file) = source else {
            return false;
        };
        self.options
            .ignored_files
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(&file.name))
    }

    fn has_room(&self, incoming: usize) -> bool {
        let count = self.total_items();
        if self.options.allow_multiple {
            self.options.max_files.map_or(true, |max| count + incoming <= max)
        } else {
            count == 0
        }
    }

    fn throw_max_files(&mut self, source: &Source, ticket: Option<Ticket>) {
        let error = Response::warning(0, "Max files");
        tracing::debug!(max = ?self.options.max_files, "max files reached");
        self.dispatch(
            Action::DidThrowMaxFiles {
                source: source.clone(),
                error: error.clone(),
            },
            false,
        );
        self.reject(ticket, error, None);
    }

    /// Makes room by removing the first item, reverting it first when it was
    /// uploaded. Returns `false` when the add waits for a forced revert.
    fn replace_first(&mut self, request: &AddRequest, ticket: Option<Ticket>) -> bool {
        let Some((id, status)) = self.active_items().next().map(|item| (item.id().clone(), item.status())) else {
            return true;
        };

        if matches!(status, ItemStatus::ProcessingComplete | ItemStatus::ProcessingRevertError) {
            let server = self.options.server.clone();
            let force = self.options.force_revert;
            let settlement = self.with_item(&id, |item, rt| item.revert(server.as_ref(), force, rt));
            if force && settlement == Some(Settlement::Pending) {
                tracing::debug!(replaced = %id, "add waits for forced revert");
                self.replacements.insert(id, (request.clone(), ticket));
                return false;
            }
        }

        self.dispatch(
            Action::RemoveItem {
                id,
                revert: false,
                ticket: None,
            },
            false,
        );
        true
    }

    /// Position in the raw collection of the `index`-th active item.
    fn raw_index(&self, index: usize) -> usize {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_archived())
            .nth(index)
            .map_or(self.items.len(), |(position, _)| position)
    }

    /// Fetch strategy for remote sources.
    ///
    /// Cross-origin URLs go through the fetch endpoint when there is one;
    /// limbo and local references need the restore and load endpoints.
    pub(super) fn load_request(&self, source: &Source, origin: ItemOrigin) -> Option<Request> {
        let reference = source.as_reference()?;
        let server = self.options.server.as_ref();
        match origin {
            ItemOrigin::Input => {
                let proxied = self
                    .is_external(reference)
                    .then(|| server.and_then(|server| server.get_request(RequestKind::Fetch, reference)))
                    .flatten();
                Some(proxied.unwrap_or_else(|| Request::fetch(reference)))
            }
            ItemOrigin::Limbo => server.and_then(|server| server.get_request(RequestKind::Restore, reference)),
            ItemOrigin::Local => server.and_then(|server| server.get_request(RequestKind::Load, reference)),
        }
    }

    fn is_external(&self, reference: &str) -> bool {
        let Ok(target) = url::Url::parse(reference) else {
            return false;
        };
        if !matches!(target.scheme(), "http" | "https") {
            return false;
        }
        self.options
            .origin
            .as_deref()
            .and_then(|origin| url::Url::parse(origin).ok())
            .map_or(true, |page| page.origin() != target.origin())
    }

    fn complete_load_item(&mut self, id: &ItemId) {
        let Some((origin, server_ref)) = self
            .item(id)
            .map(|item| (item.origin(), item.server_ref().map(str::to_string)))
        else {
            return;
        };

        self.dispatch(Action::DidLoadItem { id: id.clone() }, false);
        let ticket = self.add_tickets.remove(id);
        self.resolve(ticket, id);
        self.list_updated();

        match (origin, server_ref) {
            (ItemOrigin::Local, server_ref) => {
                self.dispatch(Action::DidLoadLocalItem { id: id.clone() }, false);
                self.dispatch(
                    Action::DidDefineValue {
                        id: id.clone(),
                        value: server_ref,
                    },
                    false,
                );
            }
            (ItemOrigin::Limbo, Some(server_id)) => {
                self.dispatch(
                    Action::DidCompleteItemProcessing {
                        id: id.clone(),
                        server_id: server_id.clone(),
                    },
                    false,
                );
                self.dispatch(
                    Action::DidDefineValue {
                        id: id.clone(),
                        value: Some(server_id),
                    },
                    false,
                );
            }
            (ItemOrigin::Input, _) if self.is_async() && self.options.instant_upload => {
                self.dispatch(
                    Action::RequestItemProcessing {
                        id: id.clone(),
                        ticket: None,
                        attempt: 0,
                    },
                    false,
                );
            }
            _ => {}
        }
    }

    // Removing

    fn missing(&mut self, ticket: Option<Ticket>, id: &ItemId) {
        tracing::debug!(item = %id, "no such item");
        self.reject(ticket, Response::error(0, "Item not found"), None);
    }

    fn request_remove_item(&mut self, id: &ItemId, revert: bool, ticket: Option<Ticket>) {
        let Some(handle) = self.item(id).map(Item::handle) else {
            self.missing(ticket, id);
            return;
        };
        if self.vetoed(FilterKey::BeforeRemoveFile, &FilterValue::Item(handle), Some(id)) {
            tracing::debug!(item = %id, "removal refused by filter");
            self.reject(ticket, Response::error(0, "Removal was refused"), Some(id));
            return;
        }
        self.dispatch(
            Action::RemoveItem {
                id: id.clone(),
                revert,
                ticket,
            },
            false,
        );
    }

    fn remove_item(&mut self, id: &ItemId, revert: bool, ticket: Option<Ticket>) {
        let Some((origin, server_ref)) = self
            .item(id)
            .map(|item| (item.origin(), item.server_ref().map(str::to_string)))
        else {
            self.missing(ticket, id);
            return;
        };

        if origin == ItemOrigin::Local {
            let request = server_ref
                .as_deref()
                .and_then(|reference| self.options.server.as_ref()?.remove_request(reference));
            if let Some(request) = request {
                self.dispatch(Action::DidStartItemRemove { id: id.clone() }, false);
                let request = self.runtime.send(id, Channel::Remove, request);
                self.removals.insert(request, (id.clone(), ticket));
                return;
            }
        }

        if revert && origin != ItemOrigin::Local && server_ref.is_some() {
            let server = self.options.server.clone();
            let force = self.options.force_revert;
            let settlement = self.with_item(id, |item, rt| item.revert(server.as_ref(), force, rt));
            if force && settlement == Some(Settlement::Pending) {
                tracing::debug!(item = %id, "removal waits for forced revert");
                self.remove_after_revert.insert(id.clone(), ticket);
                return;
            }
        }

        self.remove_from_view(id, ticket);
    }

    /// Archives an item: stops its work, hides it from queries and schedules
    /// its release.
    pub(super) fn remove_from_view(&mut self, id: &ItemId, ticket: Option<Ticket>) {
        self.processing_queue.retain(|queued| queued != id);
        let removed = self.with_item(id, |item, rt| {
            item.freeze();
            if item.is_processing() || item.status() == ItemStatus::ProcessingQueued {
                item.abort_processing(rt);
            }
            if item.status() == ItemStatus::Loading {
                item.abort_load(rt);
            }
            item.archive();
        });
        if removed.is_none() {
            self.missing(ticket, id);
            return;
        }

        self.dispatch(Action::DidRemoveItem { id: id.clone() }, false);
        self.list_updated();
        self.resolve(ticket, id);
        self.process_next();
    }

    fn release_item(&mut self, id: &ItemId) {
        if self.with_any_item(id, |item, rt| item.release(rt)).is_none() {
            return;
        }
        tracing::debug!(item = %id, "releasing item");

        let abort = Response::abort();
        if let Some(ticket) = self.add_tickets.remove(id) {
            self.reject(Some(ticket), abort.clone(), Some(id));
        }
        for ticket in self.processing_tickets.remove(id).unwrap_or_default() {
            self.reject(Some(ticket), abort.clone(), Some(id));
        }
        for ticket in self.abort_waiters.remove(id).unwrap_or_default() {
            self.reject(Some(ticket), abort.clone(), Some(id));
        }
        if let Some(ticket) = self.remove_after_revert.remove(id) {
            self.reject(ticket, abort.clone(), Some(id));
        }
        if let Some((_, ticket)) = self.replacements.remove(id) {
            self.reject(ticket, abort.clone(), None);
        }
        let removals: Vec<RequestId> = self
            .removals
            .iter()
            .filter(|(_, (owner, _))| owner == id)
            .map(|(request, _)| *request)
            .collect();
        for request in removals {
            self.runtime.abort(request);
            if let Some((_, ticket)) = self.removals.remove(&request) {
                self.reject(ticket, abort.clone(), Some(id));
            }
        }

        if let Some(timer) = self.metadata_timers.remove(id) {
            self.runtime.cancel(timer);
        }
        self.processing_queue.retain(|queued| queued != id);
        self.invalid_status.remove(id);
        self.remove_after_abort.remove(id);
        self.items.retain(|item| item.id() != id);
    }

    // Processing

    fn attach_processing_ticket(&mut self, id: &ItemId, ticket: Option<Ticket>) {
        if let Some(ticket) = ticket {
            self.processing_tickets.entry(id.clone()).or_default().push(ticket);
        }
    }

    fn request_item_processing(&mut self, id: &ItemId, ticket: Option<Ticket>, attempt: u32) {
        let Some((status, error)) = self.item(id).map(|item| (item.status(), item.error().cloned())) else {
            self.missing(ticket, id);
            return;
        };
        let failure = || error.unwrap_or_else(|| Response::error(0, "Item can't be processed"));

        match status {
            ItemStatus::Idle | ItemStatus::ProcessingError => {
                if self.with_item(id, |item, _| item.request_processing()) == Some(true) {
                    self.attach_processing_ticket(id, ticket);
                    self.dispatch(Action::DidRequestItemProcessing { id: id.clone() }, false);
                    self.dispatch(Action::ProcessItem { id: id.clone() }, true);
                }
            }
            ItemStatus::ProcessingQueued => self.attach_processing_ticket(id, ticket),
            ItemStatus::LoadError => self.reject(ticket, failure(), Some(id)),
            ItemStatus::ProcessingRevertError if attempt > 0 => self.reject(ticket, failure(), Some(id)),
            ItemStatus::ProcessingComplete | ItemStatus::ProcessingRevertError => {
                let server = self.options.server.clone();
                let force = self.options.force_revert;
                self.with_item(id, |item, rt| item.revert(server.as_ref(), force, rt));
                self.retry_processing_later(id, ticket, attempt);
            }
            ItemStatus::Processing => {
                self.with_item(id, |item, rt| item.abort_processing(rt));
                self.retry_processing_later(id, ticket, attempt);
            }
            ItemStatus::Init | ItemStatus::Loading => self.retry_processing_later(id, ticket, attempt),
        }
    }

    fn retry_processing_later(&mut self, id: &ItemId, ticket: Option<Ticket>, attempt: u32) {
        if attempt >= MAX_PROCESSING_ATTEMPTS {
            tracing::warn!(item = %id, attempt, "item never became ready for processing");
            self.reject(ticket, Response::error(0, "Item is not ready for processing"), Some(id));
            return;
        }
        self.runtime.schedule(
            PROCESSING_POLL_MS,
            TimerTask::RequestProcessing {
                item: id.clone(),
                ticket,
                attempt: attempt + 1,
            },
        );
    }

    fn at_capacity(&self) -> bool {
        self.items_by_status(ItemStatus::Processing).len() >= self.options.max_parallel_uploads
    }

    fn process_item(&mut self, id: &ItemId) {
        if self.item(id).map(Item::status) != Some(ItemStatus::ProcessingQueued) {
            tracing::debug!(item = %id, "item left the queue before its turn");
            return;
        }
        self.prune_processing_queue();
        let waiting_behind = self.processing_queue.front().map_or(false, |head| head != id);
        if self.at_capacity() || waiting_behind {
            if !self.processing_queue.contains(id) {
                tracing::debug!(item = %id, waiting_behind, "queueing for an upload slot");
                self.processing_queue.push_back(id.clone());
            }
            if waiting_behind {
                self.process_next();
            }
            return;
        }

        self.processing_queue.retain(|queued| queued != id);
        let file = self
            .with_item(id, |item, rt| item.begin_processing(rt).then(|| item.file().clone()))
            .flatten();
        if let Some(file) = file {
            self.run_chain(
                FilterKey::PrepareOutput,
                FilterValue::File(file),
                id,
                Continuation::UploadOutput { item: id.clone() },
            );
        }
    }

    fn prune_processing_queue(&mut self) {
        let queue = std::mem::take(&mut self.processing_queue);
        self.processing_queue = queue
            .into_iter()
            .filter(|queued| self.item(queued).map(Item::status) == Some(ItemStatus::ProcessingQueued))
            .collect();
    }

    /// Hands free upload slots to the oldest queued items.
    pub(super) fn process_next(&mut self) {
        let busy = self.items_by_status(ItemStatus::Processing).len();
        let free = self.options.max_parallel_uploads.saturating_sub(busy);
        if free == 0 {
            return;
        }

        self.prune_processing_queue();
        let next: Vec<ItemId> = self.processing_queue.iter().take(free).cloned().collect();
        for id in next {
            self.dispatch(Action::ProcessItem { id }, true);
        }
    }

    fn abort_item_processing(&mut self, id: &ItemId, ticket: Option<Ticket>) {
        let Some(settlement) = self.with_item(id, |item, rt| item.abort_processing(rt)) else {
            self.missing(ticket, id);
            return;
        };
        match settlement {
            Settlement::Pending => {
                if let Some(ticket) = ticket {
                    self.abort_waiters.entry(id.clone()).or_default().push(ticket);
                }
                self.remove_after_abort.insert(id.clone());
            }
            Settlement::Settled => self.resolve(ticket, id),
        }
    }

    fn request_revert(&mut self, id: &ItemId) {
        let Some(handle) = self.item(id).map(Item::handle) else {
            return;
        };
        if self.options.instant_upload && self.vetoed(FilterKey::BeforeRemoveFile, &FilterValue::Item(handle), Some(id)) {
            tracing::debug!(item = %id, "revert refused by filter");
            return;
        }
        self.dispatch(Action::RevertItemProcessing { id: id.clone() }, false);
    }

    fn revert_item_processing(&mut self, id: &ItemId) {
        let server = self.options.server.clone();
        let force = self.options.force_revert;
        let Some(settlement) = self.with_item(id, |item, rt| item.revert(server.as_ref(), force, rt)) else {
            return;
        };
        if !self.options.instant_upload {
            return;
        }
        match settlement {
            Settlement::Pending => {
                self.remove_after_revert.entry(id.clone()).or_insert(None);
            }
            Settlement::Settled => self.dispatch(
                Action::RemoveItem {
                    id: id.clone(),
                    revert: false,
                    ticket: None,
                },
                false,
            ),
        }
    }

    // Loading

    fn retry_load(&mut self, id: &ItemId) {
        let Some((source, origin)) = self.item(id).map(|item| (item.source().clone(), item.origin())) else {
            return;
        };
        let request = self.load_request(&source, origin);
        self.with_item(id, |item, rt| item.load(request, rt));
    }

    fn abort_all(&mut self) {
        let abort = Response::abort();
        for id in self.active_ids() {
            self.with_item(&id, |item, rt| {
                item.freeze();
                item.abort_load(rt);
                item.abort_processing(rt);
            });
            if let Some(ticket) = self.add_tickets.remove(&id) {
                self.reject(Some(ticket), abort.clone(), Some(&id));
            }
            for ticket in self.processing_tickets.remove(&id).unwrap_or_default() {
                self.reject(Some(ticket), abort.clone(), Some(&id));
            }
            for ticket in self.abort_waiters.remove(&id).unwrap_or_default() {
                self.resolve(Some(ticket), &id);
            }
        }
        self.processing_queue.clear();
    }

    // Ordering

    fn sort(&mut self, compare: &Comparator) {
        self.items.sort_by(|a, b| (compare.0)(&a.handle(), &b.handle()));
        self.dispatch(Action::DidSortItems, false);
        self.list_updated();
    }

    fn move_item(&mut self, id: &ItemId, index: usize) {
        let Some(current) = self.active_items().position(|item| item.id() == id) else {
            return;
        };
        let target = index.min(self.total_items().saturating_sub(1));
        if current == target {
            return;
        }
        let Some(from) = self.items.iter().position(|item| item.id() == id) else {
            return;
        };

        let item = self.items.remove(from);
        let to = self.raw_index(target);
        self.items.insert(to, item);
        tracing::debug!(item = %id, from = current, to = target, "item moved");
        self.dispatch(Action::DidSortItems, false);
        self.list_updated();
    }

    // Output

    fn request_prepare_output(&mut self, id: &ItemId, purpose: OutputPurpose) {
        let Some(file) = self.item(id).map(|item| item.file().clone()) else {
            if let OutputPurpose::Caller(ticket) = purpose {
                self.missing(ticket, id);
            }
            return;
        };
        self.run_chain(
            FilterKey::PrepareOutput,
            FilterValue::File(file),
            id,
            Continuation::Output {
                item: id.clone(),
                purpose,
            },
        );
    }

    fn schedule_metadata_follow_up(&mut self, id: &ItemId) {
        if let Some(timer) = self.metadata_timers.remove(id) {
            self.runtime.cancel(timer);
        }
        let timer = self.runtime.schedule(0, TimerTask::MetadataUpdated { item: id.clone() });
        self.metadata_timers.insert(id.clone(), timer);
    }

    fn destroy(&mut self) {
        tracing::debug!(items = self.items.len(), "destroying");
        let ids: Vec<ItemId> = self.items.iter().map(|item| item.id().clone()).collect();
        for id in &ids {
            self.with_any_item(id, |item, rt| {
                item.freeze();
                item.abort_load(rt);
                item.abort_processing(rt);
                item.release(rt);
            });
        }
        for (request, _) in std::mem::take(&mut self.removals) {
            self.runtime.abort(request);
        }
        self.items.clear();
        self.reject_all(&Response::abort());

        self.processing_queue.clear();
        self.deferred.clear();
        self.add_tickets.clear();
        self.processing_tickets.clear();
        self.abort_waiters.clear();
        self.invalid_status.clear();
        self.remove_after_abort.clear();
        self.remove_after_revert.clear();
        self.replacements.clear();
        if let Some(timer) = self.list_timer.take() {
            self.runtime.cancel(timer);
        }
        for (_, timer) in std::mem::take(&mut self.metadata_timers) {
            self.runtime.cancel(timer);
        }

        self.dispatch(Action::DidDestroy, false);
        self.destroyed = true;
    }
}
