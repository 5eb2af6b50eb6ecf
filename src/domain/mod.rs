//! Domain layer for the filedrop core.
//!
//! This module contains the plain data types the rest of the crate builds on,
//! independent of the store, the transport and the host loop.
//!
//! # Organization
//!
//! - [`error`]: Error types and result aliases
//! - [`file`]: File objects and input sources
//! - [`metadata`]: Nested per-item metadata with change detection
//! - [`status`]: Item status, origin and status labels
//!
//! # Examples
//!
//! ```
//! use filedrop::domain::{File, ItemStatus, Source};
//!
//! let source = Source::from(File::new("notes.txt", b"hi".to_vec()));
//! assert!(!source.is_empty());
//! assert!(ItemStatus::Idle.can_transition_to(ItemStatus::ProcessingQueued));
//! ```

pub mod error;
pub mod file;
pub mod metadata;
pub mod status;

pub use error::{FileError, FiledropError, Result};
pub use file::{File, Source};
pub use metadata::{Metadata, MetadataChange};
pub use status::{ItemOrigin, ItemStatus, StatusLabel};
