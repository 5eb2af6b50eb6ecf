//! Read-only projection of an item for embedders.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ItemId;
use crate::domain::{File, ItemOrigin, ItemStatus, Metadata, Source};

/// Snapshot of an item at the time it was taken.
///
/// Handles are plain values; they do not update when the item changes. Ask
/// the pond for a fresh one with [`Pond::get_file`](crate::Pond::get_file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHandle {
    pub id: ItemId,
    /// Server file reference, once known.
    pub server_id: Option<String>,
    pub origin: ItemOrigin,
    pub status: ItemStatus,
    pub file: File,
    pub source: Source,
    pub metadata: Metadata,
    pub archived: bool,
}

impl FileHandle {
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.file.name
    }

    #[must_use]
    pub fn filename_without_extension(&self) -> &str {
        self.file.name_without_extension()
    }

    #[must_use]
    pub fn file_extension(&self) -> String {
        self.file.extension()
    }

    #[must_use]
    pub const fn file_size(&self) -> Option<u64> {
        self.file.size
    }

    #[must_use]
    pub fn file_type(&self) -> &str {
        &self.file.mime_type
    }

    /// Reads metadata at a dotted path.
    #[must_use]
    pub fn get_metadata(&self, path: &str) -> Option<&Value> {
        self.metadata.get(path)
    }
}
