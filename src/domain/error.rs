//! Error types for the filedrop core.
//!
//! This module defines the crate-wide error type [`FiledropError`] with a
//! [`Result`] alias, and [`FileError`], the per-file failure handed back through
//! pending add/remove/process receivers. All errors are implemented using the
//! `thiserror` crate.

use crate::item::FileHandle;
use crate::transport::Response;
use thiserror::Error;

/// The main error type for store and public API operations.
///
/// Synchronous failures (unknown items, invalid options, configuration
/// loading) are reported with this type. Failures tied to a single file's
/// lifecycle travel as [`FileError`] instead so the caller also receives the
/// file snapshot.
///
/// # Examples
///
/// ```
/// use filedrop::FiledropError;
///
/// fn lookup() -> Result<(), FiledropError> {
///     Err(FiledropError::ItemNotFound("3f1c".to_string()))
/// }
/// assert!(lookup().is_err());
/// ```
#[derive(Debug, Error)]
pub enum FiledropError {
    /// No item matches the given id or index.
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// An option assignment failed validation or coercion.
    ///
    /// The option keeps its previous value.
    #[error("Invalid value for option {name}: {reason}")]
    InvalidOption {
        /// Canonical option name.
        name: String,
        /// Why the value was refused.
        reason: String,
    },

    /// The option name does not exist.
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a configuration file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A TOML configuration document could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The instance was destroyed and accepts no further operations.
    #[error("Instance destroyed")]
    Destroyed,
}

/// A specialized `Result` type for filedrop operations.
pub type Result<T> = std::result::Result<T, FiledropError>;

/// A failure tied to one file.
///
/// Mirrors the `{error, file}` pair handed to rejection callbacks: the
/// normalized response describing what went wrong plus a snapshot of the
/// file, when one exists (a refused add has no item yet).
#[derive(Debug, Clone, Error)]
#[error("{}", .error.text())]
pub struct FileError {
    /// Normalized response describing the failure.
    pub error: Response,
    /// Snapshot of the affected item, if it was created.
    pub file: Option<FileHandle>,
}

impl FileError {
    /// Creates a file error without an item snapshot.
    #[must_use]
    pub fn detached(error: Response) -> Self {
        Self { error, file: None }
    }

    /// Creates a file error for an existing item.
    #[must_use]
    pub fn for_file(error: Response, file: FileHandle) -> Self {
        Self {
            error,
            file: Some(file),
        }
    }
}
