//! Public semantic events.
//!
//! Embedders never see raw actions. Each action that marks a lifecycle
//! milestone is translated into zero or more [`PondEvent`]s with a
//! normalized payload, queued, and delivered on the next host tick.

use serde::Serialize;

use super::actions::Action;
use crate::domain::{File, StatusLabel};
use crate::item::{FileHandle, ItemId};
use crate::transport::Response;

/// Kind of a public event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Init,
    Warning,
    AddFileStart,
    AddFileProgress,
    AddFile,
    Error,
    RemoveFile,
    PrepareFile,
    ProcessFileStart,
    ProcessFileProgress,
    ProcessFileAbort,
    ProcessFileRevert,
    ProcessFile,
    ProcessFiles,
    UpdateFiles,
    ActivateFile,
    ReorderFiles,
    Destroy,
}

impl EventKind {
    /// Lowercase event name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Warning => "warning",
            Self::AddFileStart => "addfilestart",
            Self::AddFileProgress => "addfileprogress",
            Self::AddFile => "addfile",
            Self::Error => "error",
            Self::RemoveFile => "removefile",
            Self::PrepareFile => "preparefile",
            Self::ProcessFileStart => "processfilestart",
            Self::ProcessFileProgress => "processfileprogress",
            Self::ProcessFileAbort => "processfileabort",
            Self::ProcessFileRevert => "processfilerevert",
            Self::ProcessFile => "processfile",
            Self::ProcessFiles => "processfiles",
            Self::UpdateFiles => "updatefiles",
            Self::ActivateFile => "activatefile",
            Self::ReorderFiles => "reorderfiles",
            Self::Destroy => "destroy",
        }
    }
}

/// A public event with its normalized payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PondEvent {
    pub kind: EventKind,
    #[serde(skip)]
    pub error: Option<Response>,
    pub file: Option<FileHandle>,
    pub items: Vec<FileHandle>,
    pub progress: Option<f64>,
    pub status: Option<StatusLabel>,
    /// Prepared output, for `preparefile`.
    pub output: Option<File>,
}

impl PondEvent {
    #[must_use]
    pub const fn new(kind: EventKind) -> Self {
        Self {
            kind,
            error: None,
            file: None,
            items: Vec::new(),
            progress: None,
            status: None,
            output: None,
        }
    }

    #[must_use]
    pub fn with_file(mut self, file: Option<FileHandle>) -> Self {
        self.file = file;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: Response, status: Option<StatusLabel>) -> Self {
        self.error = Some(error);
        self.status = status;
        self
    }

    #[must_use]
    pub const fn with_progress(mut self, progress: Option<f64>) -> Self {
        self.progress = progress;
        self
    }
}

/// Translates a dispatched action into public events.
///
/// `lookup` snapshots an item by id (archived items included); `items`
/// snapshots the active list.
pub fn translate(
    action: &Action,
    lookup: impl Fn(&ItemId) -> Option<FileHandle>,
    items: impl Fn() -> Vec<FileHandle>,
) -> Vec<PondEvent> {
    let of = |kind, id: &ItemId| PondEvent::new(kind).with_file(lookup(id));
    let failed = |kind, id: &ItemId, error: &Response, status: &StatusLabel| {
        vec![
            of(EventKind::Error, id).with_error(error.clone(), Some(status.clone())),
            of(kind, id).with_error(error.clone(), Some(status.clone())),
        ]
    };

    match action {
        Action::DidInit => vec![PondEvent::new(EventKind::Init)],
        Action::DidThrowMaxFiles { error, .. } => {
            vec![PondEvent::new(EventKind::Warning).with_error(error.clone(), None)]
        }
        Action::DidStartItemLoad { id } => vec![of(EventKind::AddFileStart, id)],
        Action::DidUpdateItemLoadProgress { id, progress } => {
            vec![of(EventKind::AddFileProgress, id).with_progress(*progress)]
        }
        Action::DidLoadItem { id } => vec![of(EventKind::AddFile, id)],
        Action::DidThrowItemInvalid { id, error, status } | Action::DidThrowItemLoadError { id, error, status } => {
            failed(EventKind::AddFile, id, error, status)
        }
        Action::DidThrowItemRemoveError { id, error, status } => failed(EventKind::RemoveFile, id, error, status),
        Action::DidPrepareOutput { id, file } => {
            let mut event = of(EventKind::PrepareFile, id);
            event.output = Some(file.clone());
            vec![event]
        }
        Action::DidStartItemProcessing { id } => vec![of(EventKind::ProcessFileStart, id)],
        Action::DidUpdateItemProcessProgress { id, progress } => {
            vec![of(EventKind::ProcessFileProgress, id).with_progress(*progress)]
        }
        Action::DidAbortItemProcessing { id } => vec![of(EventKind::ProcessFileAbort, id)],
        Action::DidCompleteItemProcessing { id, .. } => vec![of(EventKind::ProcessFile, id)],
        Action::DidCompleteItemProcessingAll => vec![PondEvent::new(EventKind::ProcessFiles)],
        Action::DidRevertItemProcessing { id } => vec![of(EventKind::ProcessFileRevert, id)],
        Action::DidThrowItemProcessingError { id, error, status } => {
            failed(EventKind::ProcessFile, id, error, status)
        }
        Action::DidThrowItemProcessingRevertError { id, error, status } => {
            vec![of(EventKind::Error, id).with_error(error.clone(), Some(status.clone()))]
        }
        Action::DidRemoveItem { id } => vec![of(EventKind::RemoveFile, id)],
        Action::DidUpdateItems { .. } => {
            let mut event = PondEvent::new(EventKind::UpdateFiles);
            event.items = items();
            vec![event]
        }
        Action::DidActivateItem { id } => vec![of(EventKind::ActivateFile, id)],
        Action::DidSortItems => {
            let mut event = PondEvent::new(EventKind::ReorderFiles);
            event.items = items();
            vec![event]
        }
        Action::DidDestroy => vec![PondEvent::new(EventKind::Destroy)],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_raise_error_and_addfile() {
        let action = Action::DidThrowItemLoadError {
            id: ItemId::from("a"),
            error: Response::error(500, "boom"),
            status: StatusLabel::new("Error during load", "tap to retry"),
        };
        let kinds: Vec<EventKind> = translate(&action, |_| None, Vec::new)
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::Error, EventKind::AddFile]);
    }

    #[test]
    fn requests_are_not_public() {
        let action = Action::AbortAll;
        assert!(translate(&action, |_| None, Vec::new).is_empty());
    }
}
