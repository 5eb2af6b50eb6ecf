//! Typed lifecycle events published by items.

use crate::domain::{File, MetadataChange};
use crate::transport::Response;

/// A lifecycle milestone of one item.
///
/// Per item the order is `LoadInit → LoadMeta? → LoadProgress* → (LoadReady →
/// (Load | LoadFileError) | LoadRequestError | LoadAbort)` for loading and
/// `ProcessStart → ProcessProgress* → (ProcessComplete | ProcessError |
/// ProcessAbort)` for processing.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    LoadInit,
    /// Headers announced name, size or a server id.
    LoadMeta,
    LoadProgress(Option<f64>),
    /// The loader produced a file; load filters have yet to accept it.
    LoadReady(File),
    /// The source could not be fetched.
    LoadRequestError(Response),
    /// The file was fetched but rejected.
    LoadFileError(Response),
    LoadAbort,
    /// Loading finished and the item holds its final file.
    Load,
    ProcessStart,
    ProcessProgress(Option<f64>),
    /// Upload finished; carries the server id.
    ProcessComplete(String),
    ProcessError(Response),
    ProcessAbort,
    /// The upload was undone and the server id cleared.
    ProcessRevert,
    /// A forced revert failed.
    ProcessRevertError(Response),
    MetadataUpdate(MetadataChange),
}
