//! Actions dispatched through the store.
//!
//! This module defines the closed [`Action`] type. Requests (`AddItem`,
//! `RequestItemProcessing`, ...) carry business logic in the handler;
//! notifications (`Did*`) record what happened so the view layer and the
//! public event surface can react.
//!
//! # Architecture
//!
//! Actions never carry closures. Work that must resume later is tracked by
//! [`Ticket`]s (for promises handed to the embedder) and by continuations
//! stored in the store, so every action stays `Clone` and `Debug`.
//!
//! # Example
//!
//! ```rust
//! use filedrop::app::{Action, AddRequest};
//! use filedrop::domain::Source;
//!
//! let action = Action::AddItem {
//!     request: AddRequest::new(Source::parse("https://example.com/a.png")),
//!     ticket: None,
//! };
//! assert_eq!(action.name(), "ADD_ITEM");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::domain::{File, ItemOrigin, Metadata, MetadataChange, Source, StatusLabel};
use crate::item::{FileHandle, ItemId};
use crate::transport::Response;

/// Identifies a pending result promised to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// Ordering used by [`Action::Sort`].
#[derive(Clone)]
pub struct Comparator(pub Rc<dyn Fn(&FileHandle, &FileHandle) -> Ordering>);

impl Comparator {
    pub fn new(compare: impl Fn(&FileHandle, &FileHandle) -> Ordering + 'static) -> Self {
        Self(Rc::new(compare))
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Comparator(..)")
    }
}

impl PartialEq for Comparator {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Why output is being prepared outside of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPurpose {
    /// Right after loading, before the add resolves.
    Load,
    /// After a metadata change.
    Metadata,
    /// On request of the embedder.
    Caller(Option<Ticket>),
}

/// Everything needed to add one item.
#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest {
    pub source: Source,
    /// Requested position; ignored without insert-location freedom.
    pub index: Option<usize>,
    pub origin: ItemOrigin,
    /// Initial metadata, written silently before loading.
    pub metadata: Metadata,
}

impl AddRequest {
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self {
            source,
            index: None,
            origin: ItemOrigin::Input,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub const fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub const fn with_origin(mut self, origin: ItemOrigin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A unit of communication between handlers, items and the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // Requests
    AddItem {
        request: AddRequest,
        ticket: Option<Ticket>,
    },
    /// Adds several items at consecutive positions; the ticket resolves
    /// with every added file or rejects with the first failure.
    AddItems {
        requests: Vec<AddRequest>,
        ticket: Option<Ticket>,
    },
    /// Resolves the add once loading and all load filters are done.
    CompleteLoadItem {
        id: ItemId,
    },
    RequestRemoveItem {
        id: ItemId,
        revert: bool,
        ticket: Option<Ticket>,
    },
    RemoveItem {
        id: ItemId,
        /// Revert the upload before removing.
        revert: bool,
        ticket: Option<Ticket>,
    },
    /// The view finished presenting the removal; the item can be dropped.
    ReleaseItem {
        id: ItemId,
    },
    RequestItemProcessing {
        id: ItemId,
        ticket: Option<Ticket>,
        attempt: u32,
    },
    ProcessItem {
        id: ItemId,
    },
    RetryItemProcessing {
        id: ItemId,
    },
    AbortItemProcessing {
        id: ItemId,
        ticket: Option<Ticket>,
    },
    RequestRevertItemProcessing {
        id: ItemId,
    },
    RevertItemProcessing {
        id: ItemId,
    },
    AbortItemLoad {
        id: ItemId,
    },
    RetryItemLoad {
        id: ItemId,
    },
    AbortAll,
    Sort {
        compare: Comparator,
    },
    MoveItem {
        id: ItemId,
        index: usize,
    },
    ActivateItem {
        id: ItemId,
    },
    SetItemMetadata {
        id: ItemId,
        key: String,
        value: Value,
        silent: bool,
    },
    RequestPrepareOutput {
        id: ItemId,
        purpose: OutputPurpose,
    },
    SetOption {
        name: String,
        value: Value,
    },
    Destroy,

    // Notifications
    DidInit,
    DidSetOption {
        name: String,
        value: Value,
    },
    DidThrowMaxFiles {
        source: Source,
        error: Response,
    },
    DidAddItem {
        id: ItemId,
        index: usize,
    },
    DidStartItemLoad {
        id: ItemId,
    },
    DidUpdateItemMeta {
        id: ItemId,
    },
    DidUpdateItemLoadProgress {
        id: ItemId,
        progress: Option<f64>,
    },
    DidThrowItemInvalid {
        id: ItemId,
        error: Response,
        status: StatusLabel,
    },
    DidThrowItemLoadError {
        id: ItemId,
        error: Response,
        status: StatusLabel,
    },
    DidLoadItem {
        id: ItemId,
    },
    DidLoadLocalItem {
        id: ItemId,
    },
    DidPrepareOutput {
        id: ItemId,
        file: File,
    },
    DidRequestItemProcessing {
        id: ItemId,
    },
    DidStartItemProcessing {
        id: ItemId,
    },
    DidUpdateItemProcessProgress {
        id: ItemId,
        progress: Option<f64>,
    },
    DidCompleteItemProcessing {
        id: ItemId,
        server_id: String,
    },
    DidThrowItemProcessingError {
        id: ItemId,
        error: Response,
        status: StatusLabel,
    },
    DidAbortItemProcessing {
        id: ItemId,
    },
    DidRevertItemProcessing {
        id: ItemId,
    },
    DidThrowItemProcessingRevertError {
        id: ItemId,
        error: Response,
        status: StatusLabel,
    },
    DidCompleteItemProcessingAll,
    /// The value the form field should carry for this item.
    DidDefineValue {
        id: ItemId,
        value: Option<String>,
    },
    DidStartItemRemove {
        id: ItemId,
    },
    DidThrowItemRemoveError {
        id: ItemId,
        error: Response,
        status: StatusLabel,
    },
    DidRemoveItem {
        id: ItemId,
    },
    DidUpdateItems {
        ids: Vec<ItemId>,
    },
    DidUpdateItemMetadata {
        id: ItemId,
        change: MetadataChange,
    },
    DidActivateItem {
        id: ItemId,
    },
    DidSortItems,
    DidDestroy,
}

impl Action {
    /// Conventional upper-snake name, for logs and the view layer.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddItem { .. } => "ADD_ITEM",
            Self::AddItems { .. } => "ADD_ITEMS",
            Self::CompleteLoadItem { .. } => "COMPLETE_LOAD_ITEM",
            Self::RequestRemoveItem { .. } => "REQUEST_REMOVE_ITEM",
            Self::RemoveItem { .. } => "REMOVE_ITEM",
            Self::ReleaseItem { .. } => "RELEASE_ITEM",
            Self::RequestItemProcessing { .. } => "REQUEST_ITEM_PROCESSING",
            Self::ProcessItem { .. } => "PROCESS_ITEM",
            Self::RetryItemProcessing { .. } => "RETRY_ITEM_PROCESSING",
            Self::AbortItemProcessing { .. } => "ABORT_ITEM_PROCESSING",
            Self::RequestRevertItemProcessing { .. } => "REQUEST_REVERT_ITEM_PROCESSING",
            Self::RevertItemProcessing { .. } => "REVERT_ITEM_PROCESSING",
            Self::AbortItemLoad { .. } => "ABORT_ITEM_LOAD",
            Self::RetryItemLoad { .. } => "RETRY_ITEM_LOAD",
            Self::AbortAll => "ABORT_ALL",
            Self::Sort { .. } => "SORT",
            Self::MoveItem { .. } => "MOVE_ITEM",
            Self::ActivateItem { .. } => "ACTIVATE_ITEM",
            Self::SetItemMetadata { .. } => "SET_ITEM_METADATA",
            Self::RequestPrepareOutput { .. } => "REQUEST_PREPARE_OUTPUT",
            Self::SetOption { .. } => "SET_OPTION",
            Self::Destroy => "DESTROY",
            Self::DidInit => "DID_INIT",
            Self::DidSetOption { .. } => "DID_SET_OPTION",
            Self::DidThrowMaxFiles { .. } => "DID_THROW_MAX_FILES",
            Self::DidAddItem { .. } => "DID_ADD_ITEM",
            Self::DidStartItemLoad { .. } => "DID_START_ITEM_LOAD",
            Self::DidUpdateItemMeta { .. } => "DID_UPDATE_ITEM_META",
            Self::DidUpdateItemLoadProgress { .. } => "DID_UPDATE_ITEM_LOAD_PROGRESS",
            Self::DidThrowItemInvalid { .. } => "DID_THROW_ITEM_INVALID",
            Self::DidThrowItemLoadError { .. } => "DID_THROW_ITEM_LOAD_ERROR",
            Self::DidLoadItem { .. } => "DID_LOAD_ITEM",
            Self::DidLoadLocalItem { .. } => "DID_LOAD_LOCAL_ITEM",
            Self::DidPrepareOutput { .. } => "DID_PREPARE_OUTPUT",
            Self::DidRequestItemProcessing { .. } => "DID_REQUEST_ITEM_PROCESSING",
            Self::DidStartItemProcessing { .. } => "DID_START_ITEM_PROCESSING",
            Self::DidUpdateItemProcessProgress { .. } => "DID_UPDATE_ITEM_PROCESS_PROGRESS",
            Self::DidCompleteItemProcessing { .. } => "DID_COMPLETE_ITEM_PROCESSING",
            Self::DidThrowItemProcessingError { .. } => "DID_THROW_ITEM_PROCESSING_ERROR",
            Self::DidAbortItemProcessing { .. } => "DID_ABORT_ITEM_PROCESSING",
            Self::DidRevertItemProcessing { .. } => "DID_REVERT_ITEM_PROCESSING",
            Self::DidThrowItemProcessingRevertError { .. } => "DID_THROW_ITEM_PROCESSING_REVERT_ERROR",
            Self::DidCompleteItemProcessingAll => "DID_COMPLETE_ITEM_PROCESSING_ALL",
            Self::DidDefineValue { .. } => "DID_DEFINE_VALUE",
            Self::DidStartItemRemove { .. } => "DID_START_ITEM_REMOVE",
            Self::DidThrowItemRemoveError { .. } => "DID_THROW_ITEM_REMOVE_ERROR",
            Self::DidRemoveItem { .. } => "DID_REMOVE_ITEM",
            Self::DidUpdateItems { .. } => "DID_UPDATE_ITEMS",
            Self::DidUpdateItemMetadata { .. } => "DID_UPDATE_ITEM_METADATA",
            Self::DidActivateItem { .. } => "DID_ACTIVATE_ITEM",
            Self::DidSortItems => "DID_SORT_ITEMS",
            Self::DidDestroy => "DID_DESTROY",
        }
    }
}
