//! Infrastructure layer for time, randomness and I/O.
//!
//! Everything nondeterministic is funneled through the [`Runtime`]: the
//! virtual clock advanced by the host, the seedable random source and the
//! transport. This keeps the store and the items deterministic under test.

pub mod runtime;
pub mod timers;

pub use runtime::{Channel, Route, Runtime, TimerTask};
pub use timers::{TimerId, TimerQueue};
