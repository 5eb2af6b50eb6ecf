//! Follow-ups to work that finished after its handler returned.
//!
//! Three sources feed this module, all drained by [`Store::settle`]:
//! item lifecycle events, finished filter chains (tagged with a
//! [`Continuation`]) and responses to remove requests. Each turns into
//! notifications, settled tickets and the next step of the item's life.

use super::actions::{Action, OutputPurpose};
use super::store::{Continuation, Store};
use crate::domain::{File, ItemOrigin, ItemStatus, StatusLabel};
use crate::filter::{FilterError, FilterKey, FilterResult, FilterValue};
use crate::infrastructure::Channel;
use crate::item::{Item, ItemEvent, ItemId};
use crate::transport::{RequestId, Response, TransportEvent};

impl Store {
    /// Turns an item lifecycle event into actions.
    #[allow(clippy::too_many_lines)]
    pub(super) fn on_item_event(&mut self, id: &ItemId, event: ItemEvent) {
        let _span = tracing::debug_span!("item_event", item = %id).entered();
        if self.item(id).is_none() {
            tracing::trace!(?event, "event of a removed item dropped");
            return;
        }

        match event {
            ItemEvent::LoadInit => self.dispatch(Action::DidStartItemLoad { id: id.clone() }, false),
            ItemEvent::LoadMeta => self.dispatch(Action::DidUpdateItemMeta { id: id.clone() }, false),
            ItemEvent::LoadProgress(progress) => self.dispatch(
                Action::DidUpdateItemLoadProgress {
                    id: id.clone(),
                    progress,
                },
                false,
            ),
            ItemEvent::LoadReady(file) => self.run_chain(
                FilterKey::LoadFile,
                FilterValue::File(file),
                id,
                Continuation::FileLoaded { item: id.clone() },
            ),
            ItemEvent::LoadRequestError(error) => {
                if error.is_client_error() {
                    let status = self.options.labels.load_refused(error.code, &error.text());
                    self.throw_invalid(id, error, status);
                } else {
                    tracing::debug!(code = error.code, "load failed, retry possible");
                    let status = self.options.labels.load_error();
                    self.dispatch(
                        Action::DidThrowItemLoadError {
                            id: id.clone(),
                            error,
                            status,
                        },
                        false,
                    );
                }
            }
            ItemEvent::LoadFileError(error) => {
                let status = self
                    .invalid_status
                    .remove(id)
                    .unwrap_or_else(|| self.options.labels.invalid(&error.text()));
                self.throw_invalid(id, error, status);
            }
            ItemEvent::LoadAbort => {
                let ticket = self.add_tickets.remove(id);
                self.reject(ticket, Response::abort(), Some(id));
                self.dispatch(
                    Action::RemoveItem {
                        id: id.clone(),
                        revert: false,
                        ticket: None,
                    },
                    false,
                );
            }
            ItemEvent::Load => {
                if let Some(handle) = self.item(id).map(Item::handle) {
                    self.run_chain(
                        FilterKey::DidLoadItem,
                        FilterValue::Item(handle),
                        id,
                        Continuation::ItemLoaded { item: id.clone() },
                    );
                }
            }
            ItemEvent::ProcessStart => self.dispatch(Action::DidStartItemProcessing { id: id.clone() }, false),
            ItemEvent::ProcessProgress(progress) => self.dispatch(
                Action::DidUpdateItemProcessProgress {
                    id: id.clone(),
                    progress,
                },
                false,
            ),
            ItemEvent::ProcessComplete(server_id) => {
                tracing::debug!(%server_id, "upload complete");
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
                for ticket in self.processing_tickets.remove(id).unwrap_or_default() {
                    self.resolve(Some(ticket), id);
                }
                self.release_local_source(id);
                self.process_next();
                self.check_all_complete();
            }
            ItemEvent::ProcessError(error) => {
                let status = self.options.labels.processing_error(&error.text());
                self.dispatch(
                    Action::DidThrowItemProcessingError {
                        id: id.clone(),
                        error: error.clone(),
                        status,
                    },
                    false,
                );
                for ticket in self.processing_tickets.remove(id).unwrap_or_default() {
                    self.reject(Some(ticket), error.clone(), Some(id));
                }
                self.process_next();
            }
            ItemEvent::ProcessAbort => {
                self.dispatch(Action::DidAbortItemProcessing { id: id.clone() }, false);
                for ticket in self.processing_tickets.remove(id).unwrap_or_default() {
                    self.reject(Some(ticket), Response::abort(), Some(id));
                }
                for ticket in self.abort_waiters.remove(id).unwrap_or_default() {
                    self.resolve(Some(ticket), id);
                }
                self.process_next();
                if self.remove_after_abort.remove(id) && self.options.instant_upload {
                    self.dispatch(
                        Action::RemoveItem {
                            id: id.clone(),
                            revert: false,
                            ticket: None,
                        },
                        false,
                    );
                }
            }
            ItemEvent::ProcessRevert => {
                self.dispatch(Action::DidRevertItemProcessing { id: id.clone() }, false);
                self.dispatch(
                    Action::DidDefineValue {
                        id: id.clone(),
                        value: None,
                    },
                    false,
                );
                if let Some(ticket) = self.remove_after_revert.remove(id) {
                    self.dispatch(
                        Action::RemoveItem {
                            id: id.clone(),
                            revert: false,
                            ticket,
                        },
                        false,
                    );
                }
                if let Some((request, ticket)) = self.replacements.remove(id) {
                    self.dispatch(
                        Action::RemoveItem {
                            id: id.clone(),
                            revert: false,
                            ticket: None,
                        },
                        false,
                    );
                    self.dispatch(Action::AddItem { request, ticket }, false);
                }
            }
            ItemEvent::ProcessRevertError(error) => {
                let status = self.options.labels.revert_error(&error.text());
                self.dispatch(
                    Action::DidThrowItemProcessingRevertError {
                        id: id.clone(),
                        error: error.clone(),
                        status,
                    },
                    false,
                );
                if let Some(ticket) = self.remove_after_revert.remove(id) {
                    self.reject(ticket, error.clone(), Some(id));
                }
                if let Some((_, ticket)) = self.replacements.remove(id) {
                    self.reject(ticket, error, None);
                }
            }
            ItemEvent::MetadataUpdate(change) => self.dispatch(
                Action::DidUpdateItemMetadata {
                    id: id.clone(),
                    change,
                },
                false,
            ),
        }
    }

    fn throw_invalid(&mut self, id: &ItemId, error: Response, status: StatusLabel) {
        self.dispatch(
            Action::DidThrowItemInvalid {
                id: id.clone(),
                error: error.clone(),
                status,
            },
            false,
        );
        let ticket = self.add_tickets.remove(id);
        self.reject(ticket, error, Some(id));
    }

    /// Continues after a filter chain finished.
    pub(super) fn resume(&mut self, then: Continuation, result: FilterResult) {
        let _span = tracing::debug_span!("resume", continuation = ?then).entered();

        match then {
            Continuation::FileLoaded { item } => match expect_file(result) {
                Ok(file) => {
                    self.with_item(&item, |item, rt| item.complete_load(file, rt));
                }
                Err(error) => {
                    tracing::debug!(%error, "loaded file refused by filter");
                    if let Some(status) = error.status {
                        self.invalid_status.insert(item.clone(), status);
                    }
                    self.with_item(&item, |item, rt| item.fail_load(Response::error(0, error.message), rt));
                }
            },
            Continuation::ItemLoaded { item } => self.accept_loaded(&item, result),
            Continuation::LoadOutputDecision { item } => {
                if wants_output(&result) {
                    self.dispatch(
                        Action::RequestPrepareOutput {
                            id: item,
                            purpose: OutputPurpose::Load,
                        },
                        true,
                    );
                } else {
                    self.dispatch(Action::CompleteLoadItem { id: item }, false);
                }
            }
            Continuation::MetadataOutputDecision { item } => {
                if wants_output(&result) {
                    self.dispatch(
                        Action::RequestPrepareOutput {
                            id: item,
                            purpose: OutputPurpose::Metadata,
                        },
                        true,
                    );
                }
            }
            Continuation::UploadOutput { item } => {
                if self.item(&item).map(Item::status) != Some(ItemStatus::Processing) {
                    tracing::debug!(%item, "upload abandoned while preparing output");
                    return;
                }
                match expect_file(result) {
                    Ok(file) => self.send_upload(&item, file),
                    Err(error) => {
                        self.with_item(&item, |item, rt| item.fail_processing(Response::error(0, error.message), rt));
                    }
                }
            }
            Continuation::Output { item, purpose } => match expect_file(result) {
                Ok(file) => self.run_chain(
                    FilterKey::CompletePrepareOutput,
                    FilterValue::File(file),
                    &item,
                    Continuation::CompletedOutput {
                        item: item.clone(),
                        purpose,
                    },
                ),
                Err(error) => self.output_failed(&item, purpose, error),
            },
            Continuation::CompletedOutput { item, purpose } => match expect_file(result) {
                Ok(file) => self.output_ready(&item, purpose, file),
                Err(error) => self.output_failed(&item, purpose, error),
            },
        }
    }

    fn accept_loaded(&mut self, id: &ItemId, result: FilterResult) {
        if let Err(error) = result {
            tracing::debug!(%error, "loaded item refused by filter");
            let response = Response::error(0, error.message);
            match error.status {
                Some(status) => self.throw_invalid(id, response, status),
                None => {
                    let ticket = self.add_tickets.remove(id);
                    self.reject(ticket, response, Some(id));
                    self.dispatch(
                        Action::RemoveItem {
                            id: id.clone(),
                            revert: false,
                            ticket: None,
                        },
                        false,
                    );
                }
            }
            return;
        }

        let Some(handle) = self.item(id).map(Item::handle) else {
            return;
        };
        if self.vetoed(FilterKey::BeforeAddFile, &FilterValue::Item(handle), Some(id)) {
            tracing::debug!(item = %id, "add refused by filter");
            let ticket = self.add_tickets.remove(id);
            self.reject(ticket, Response::error(0, "File was refused"), Some(id));
            self.dispatch(
                Action::RemoveItem {
                    id: id.clone(),
                    revert: false,
                    ticket: None,
                },
                false,
            );
            return;
        }

        self.run_chain(
            FilterKey::ShouldPrepareOutput,
            FilterValue::Bool(false),
            id,
            Continuation::LoadOutputDecision { item: id.clone() },
        );
    }

    fn output_ready(&mut self, id: &ItemId, purpose: OutputPurpose, file: File) {
        if self.item(id).is_none() {
            if let OutputPurpose::Caller(ticket) = purpose {
                self.reject(ticket, Response::abort(), Some(id));
            }
            return;
        }
        match purpose {
            OutputPurpose::Load => {
                self.dispatch(Action::DidPrepareOutput { id: id.clone(), file }, false);
                self.dispatch(Action::CompleteLoadItem { id: id.clone() }, false);
            }
            OutputPurpose::Metadata => self.dispatch(Action::DidPrepareOutput { id: id.clone(), file }, false),
            OutputPurpose::Caller(ticket) => self.resolve_output(ticket, file),
        }
    }

    fn output_failed(&mut self, id: &ItemId, purpose: OutputPurpose, error: FilterError) {
        tracing::warn!(item = %id, %error, "output preparation failed");
        match purpose {
            OutputPurpose::Load => self.dispatch(Action::CompleteLoadItem { id: id.clone() }, false),
            OutputPurpose::Metadata => {}
            OutputPurpose::Caller(ticket) => self.reject(ticket, Response::error(0, error.message), Some(id)),
        }
    }

    fn send_upload(&mut self, id: &ItemId, file: File) {
        self.dispatch(
            Action::DidPrepareOutput {
                id: id.clone(),
                file: file.clone(),
            },
            false,
        );

        let server = self.options.server.clone();
        let name = self.options.name.clone();
        let perceived = self.options.allow_minimum_upload_duration;
        self.with_item(id, |item, rt| {
            let request = server
                .as_ref()
                .and_then(|server| server.process_request(&name, &file, item.metadata()));
            let mapping = server
                .as_ref()
                .and_then(|server| server.process.as_ref())
                .map(|endpoint| (endpoint.on_load.clone(), endpoint.on_error.clone()))
                .unwrap_or_default();
            item.process(request, mapping, perceived, rt);
        });
    }

    /// Once a persisted file was uploaded again, its original copy on the
    /// server is removed and the item continues as a limbo file.
    fn release_local_source(&mut self, id: &ItemId) {
        if !self.options.instant_upload {
            return;
        }
        let Some(reference) = self
            .item(id)
            .filter(|item| item.origin() == ItemOrigin::Local)
            .and_then(|item| item.source().as_reference().map(str::to_string))
        else {
            return;
        };
        let Some(request) = self
            .options
            .server
            .as_ref()
            .and_then(|server| server.remove_request(&reference))
        else {
            return;
        };

        tracing::debug!(item = %id, %reference, "removing replaced local file");
        self.with_item(id, |item, _| item.set_origin(ItemOrigin::Limbo));
        self.runtime.send(id, Channel::Remove, request);
    }

    fn check_all_complete(&mut self) {
        let all_complete = {
            let mut active = self.active_items().peekable();
            if active.peek().is_none() {
                return;
            }
            active.all(|item| item.status() == ItemStatus::ProcessingComplete)
        };
        if all_complete {
            self.dispatch(Action::DidCompleteItemProcessingAll, false);
        }
    }

    /// Reacts to a settled burst of metadata changes.
    ///
    /// Local ponds may prepare fresh output. Uploaded or uploading items are
    /// reverted or aborted, and re-uploaded when uploads are instant.
    pub(super) fn metadata_follow_up(&mut self, id: &ItemId) {
        let Some(status) = self.item(id).map(Item::status) else {
            return;
        };
        if matches!(status, ItemStatus::Init | ItemStatus::Loading | ItemStatus::LoadError) {
            return;
        }

        if !self.is_async() {
            self.run_chain(
                FilterKey::ShouldPrepareOutput,
                FilterValue::Bool(false),
                id,
                Continuation::MetadataOutputDecision { item: id.clone() },
            );
            return;
        }

        match status {
            ItemStatus::ProcessingComplete => {
                let server = self.options.server.clone();
                let force = self.options.force_revert;
                self.with_item(id, |item, rt| item.revert(server.as_ref(), force, rt));
            }
            ItemStatus::Processing => {
                self.with_item(id, |item, rt| item.abort_processing(rt));
            }
            _ => {}
        }
        if self.options.instant_upload {
            self.dispatch(
                Action::RequestItemProcessing {
                    id: id.clone(),
                    ticket: None,
                    attempt: 0,
                },
                false,
            );
        }
    }

    /// Handles the response to a remove request of a persisted file.
    pub(super) fn on_remove_response(&mut self, request: RequestId, event: TransportEvent) {
        let error = match event {
            TransportEvent::Headers(_) | TransportEvent::Progress { .. } => return,
            TransportEvent::Load(_) => None,
            TransportEvent::Error(response) => Some(response),
            TransportEvent::Timeout => Some(Response::error(0, "Request timed out")),
            TransportEvent::Abort => Some(Response::abort()),
        };
        self.runtime.finish(request);
        let Some((id, ticket)) = self.removals.remove(&request) else {
            tracing::debug!(%request, "unawaited remove settled");
            return;
        };

        match error {
            None => self.remove_from_view(&id, ticket),
            Some(error) => {
                tracing::warn!(item = %id, code = error.code, "remove failed");
                let status = self.options.labels.remove_error(&error.text());
                self.dispatch(
                    Action::DidThrowItemRemoveError {
                        id: id.clone(),
                        error: error.clone(),
                        status,
                    },
                    false,
                );
                self.reject(ticket, error, Some(&id));
            }
        }
    }
}

fn expect_file(result: FilterResult) -> Result<File, FilterError> {
    result?
        .into_file()
        .ok_or_else(|| FilterError::new("Filter did not return a file"))
}

fn wants_output(result: &FilterResult) -> bool {
    matches!(result, Ok(FilterValue::Bool(true)))
}
