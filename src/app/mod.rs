//! Application layer: actions, the store and its handlers.
//!
//! This layer sits between the embedder-facing [`Pond`](crate::Pond) and the
//! per-file state machines in [`item`](crate::item). It owns the collection
//! and implements every cross-item rule: capacity, replacement, the upload
//! queue, revert and removal policies.
//!
//! # Architecture
//!
//! ```text
//! Pond ─► Action ─► Store::dispatch ─► handler ─► Item ─► Runtime
//!                        ▲                                  │
//!                        └──── lifecycle ◄── ItemEvent ─────┘
//! ```
//!
//! # Modules
//!
//! - [`actions`]: The closed set of requests and notifications
//! - [`events`]: Translation of notifications into public events
//! - [`options`]: Pond options and labels
//! - [`store`]: Collection, dispatcher and host loop
//! - `handler`: Business logic per request action
//! - `lifecycle`: Follow-ups to item events and filter chains

pub mod actions;
pub mod events;
mod handler;
mod lifecycle;
pub mod options;
pub mod store;

pub use actions::{Action, AddRequest, Comparator, OutputPurpose, Ticket};
pub use events::{EventKind, PondEvent};
pub use options::{InsertLocation, Labels, Options};
pub use store::{Outcome, Pending, Store};
