//! Filedrop: a headless file upload core.
//!
//! Filedrop owns everything behind a file upload widget except the pixels:
//! - An item lifecycle state machine per file (load, upload, revert, remove)
//! - A bounded-concurrency upload scheduler with a FIFO queue
//! - An asynchronous filter pipeline embedders hook into
//! - A public event surface and settle-once result handles
//!
//! The network and the clock belong to the host. Requests leave through a
//! [`Transport`]; their callbacks and the passage of time come back through
//! [`Pond::on_transport`] and [`Pond::advance`].

#![allow(clippy::multiple_crate_versions)]

//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Pond (pond.rs)                                     │  ← Public surface
//! └─────────────────────────────────────────────────────┘
//!                        │
//! ┌─────────────────────────────────────────────────────┐
//! │  Application Layer (app/)                           │  ← Store
//! │  - Action dispatching and handlers                  │  ← Business logic
//! │  - Options, tickets, public events                  │
//! └─────────────────────────────────────────────────────┘
//!         │                    │                    │
//! ┌───────────────┐   ┌───────────────┐   ┌───────────────┐
//! │ Items         │   │ Filters       │   │ Transport     │
//! │ (item/)       │   │ (filter/)     │   │ (transport/)  │
//! │ - Loader      │   │ - Chains      │   │ - Requests    │
//! │ - Processor   │   │ - Fan-out     │   │ - Responses   │
//! │ - Status      │   │ - Vetoes      │   │ - Endpoints   │
//! └───────────────┘   └───────────────┘   └───────────────┘
//!         │                    │                    │
//! ┌─────────────────────────────────────────────────────┐
//! │  Infrastructure & Domain Layers                     │
//! │  - Virtual clock and request routing (infrastructure/)
//! │  - Error types (domain/error)                       │
//! │  - Files, sources, metadata (domain/)               │
//! └─────────────────────────────────────────────────────┘
//!                        │
//! ┌─────────────────────────────────────────────────────┐
//! │  Observability (observability/)                     │  ← Optional
//! │  - tracing subscriber with an OpenTelemetry layer   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`app`]: Store, actions, options and public events
//! - [`domain`]: Core domain types (files, statuses, errors)
//! - [`filter`]: Registry and runner for embedder filters
//! - [`infrastructure`]: Virtual clock and request routing
//! - [`item`]: Per-file state machine
//! - [`transport`]: Request/response types and the host seam
//! - [`observability`]: Tracing setup
//!
//! # Configuration
//!
//! A pond can be configured from TOML:
//!
//! ```toml
//! trace_level = "debug"
//! seed = 42
//!
//! [options]
//! allow_multiple = true
//! max_files = 3
//!
//! [options.server]
//! url = "https://uploads.example.com/"
//! process = { url = "process" }
//! ```
//!
//! # Example
//!
//! ```rust
//! use filedrop::transport::MemoryTransport;
//! use filedrop::{initialize, Config, EventKind};
//!
//! let config = Config::from_toml_str("[options]\nallow_multiple = true\n")?;
//! let mut pond = initialize(&config, Box::new(MemoryTransport::new()))?;
//!
//! let _added = pond.add_file("https://example.com/cat.png");
//! let events = pond.advance(0);
//! assert_eq!(events[0].kind, EventKind::Init);
//! # Ok::<(), filedrop::FiledropError>(())
//! ```
//!
//! # Host Loop
//!
//! 1. **Operations** (`Pond::add_file`, ...) dispatch actions; handlers run
//!    synchronously and may start requests on the transport.
//! 2. **Transport callbacks** are fed back with `Pond::on_transport`.
//! 3. **Time** moves only through `Pond::advance`, which fires timers and
//!    delivers the public events raised so far.
//! 4. **Frames**: the view layer calls `Pond::frame` once per frame; blocking
//!    actions run once it reports the view is resting.

pub mod app;
pub mod domain;
pub mod filter;
pub mod infrastructure;
pub mod item;
pub mod observability;
pub mod pond;
pub mod transport;

pub use app::{Action, AddRequest, EventKind, Options, Outcome, Pending, PondEvent};
pub use domain::{File, FileError, FiledropError, ItemOrigin, ItemStatus, Result, Source};
pub use filter::{FilterKey, FilterValue};
pub use item::{FileHandle, ItemId};
pub use pond::Pond;
pub use transport::{MemoryTransport, Transport};

use std::path::Path;

use serde::Deserialize;

/// Instance configuration.
///
/// # Example
///
/// ```rust
/// use filedrop::Config;
///
/// let config = Config::from_toml_str(r#"
///     trace_level = "warn"
///
///     [options]
///     max_parallel_uploads = 4
/// "#)?;
/// assert_eq!(config.options.max_parallel_uploads, 4);
/// assert_eq!(config.seed, None);
/// # Ok::<(), filedrop::FiledropError>(())
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracing filter directive, e.g. `info` or `filedrop=debug`.
    ///
    /// `RUST_LOG` takes precedence. Default: `"info"`
    pub trace_level: Option<String>,

    /// Seed for perceived upload progress; random when unset.
    pub seed: Option<u64>,

    pub options: Options,
}

impl Config {
    /// Parses a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`FiledropError::Toml`] when the document does not parse.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// - [`FiledropError::Io`] when the file cannot be read
    /// - [`FiledropError::Toml`] when it does not parse
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Creates a pond from configuration.
///
/// Installs the tracing subscriber when `trace_level` is set.
///
/// # Errors
///
/// Returns [`FiledropError::InvalidOption`] when the options fail validation.
pub fn initialize(config: &Config, transport: Box<dyn Transport>) -> Result<Pond> {
    if config.trace_level.is_some() {
        observability::init_tracing(config);
    }
    tracing::debug!(seed = ?config.seed, "initializing filedrop");
    Pond::new(config.options.clone(), transport, config.seed)
}
