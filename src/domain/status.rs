//! Item status and origin types.
//!
//! [`ItemStatus`] is the single authoritative lifecycle field of an item and
//! drives every UI mapping. Allowed transitions are encoded in
//! [`ItemStatus::can_transition_to`]; the item refuses (and logs) any other
//! move.
//!
//! # State Machine
//!
//! ```text
//! INIT                    ─ load started ─────────────► LOADING
//! LOADING                 ─ load / load with ref ─────► IDLE / PROCESSING_COMPLETE
//! LOADING                 ─ error / abort ────────────► LOAD_ERROR / INIT
//! LOAD_ERROR              ─ retry / abort ────────────► LOADING / INIT
//! IDLE, PROCESSING_ERROR  ─ request processing ───────► PROCESSING_QUEUED
//! PROCESSING_QUEUED       ─ slot granted / abort ─────► PROCESSING / IDLE
//! PROCESSING              ─ success / error / abort ──► PROCESSING_COMPLETE / PROCESSING_ERROR / IDLE
//! PROCESSING_COMPLETE     ─ revert ok / forced fail ──► IDLE / PROCESSING_REVERT_ERROR
//! PROCESSING_REVERT_ERROR ─ revert ok / forced fail ──► IDLE / PROCESSING_REVERT_ERROR
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// Created, nothing loaded yet.
    Init,
    /// Waiting for user or API action; file is loaded.
    Idle,
    /// Loader is resolving the source.
    Loading,
    /// Loading failed.
    LoadError,
    /// Waiting for a free upload slot.
    ProcessingQueued,
    /// Upload in flight.
    Processing,
    /// Upload finished and the server holds the file.
    ProcessingComplete,
    /// Upload failed.
    ProcessingError,
    /// Undoing the upload failed under the force-revert policy.
    ProcessingRevertError,
}

impl ItemStatus {
    /// Returns whether moving from `self` to `next` is an allowed edge.
    ///
    /// Self-loops on `Idle` and `ProcessingRevertError` are allowed so a
    /// repeated revert outcome is not reported as a violation.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ItemStatus::{
            Idle, Init, LoadError, Loading, Processing, ProcessingComplete, ProcessingError,
            ProcessingQueued, ProcessingRevertError,
        };

        matches!(
            (self, next),
            (Init | LoadError, Loading)
                | (Loading, LoadError | Init | Idle | ProcessingComplete)
                | (LoadError, Init)
                | (Idle | ProcessingError, ProcessingQueued)
                | (ProcessingQueued, Processing | Idle)
                | (Processing, ProcessingError | Idle | ProcessingComplete)
                | (ProcessingComplete | ProcessingRevertError, Idle | ProcessingRevertError)
                | (Idle, Idle)
        )
    }

    /// Returns whether the status waits for external action.
    ///
    /// Used by hosts to decide whether an item is "at rest" for UI purposes.
    #[must_use]
    pub const fn is_resting(self) -> bool {
        matches!(
            self,
            Self::Idle
                | Self::LoadError
                | Self::ProcessingComplete
                | Self::ProcessingError
                | Self::ProcessingRevertError
        )
    }

    /// Returns whether processing may be requested from this status without
    /// a corrective revert or abort first.
    #[must_use]
    pub const fn can_queue_for_processing(self) -> bool {
        matches!(self, Self::Idle | Self::ProcessingError)
    }
}

/// Where an item's bytes currently reside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOrigin {
    /// Freshly supplied by the user.
    #[default]
    Input,
    /// Already uploaded to a temporary server location.
    Limbo,
    /// A persisted server-side file, never sent as binary.
    Local,
}

/// Human-readable status pair shown inline next to a file.
///
/// `main` names the failure, `sub` carries the affordance ("tap to retry").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLabel {
    /// Primary status line.
    pub main: String,
    /// Secondary line, usually the suggested action.
    pub sub: String,
}

impl StatusLabel {
    /// Creates a status pair.
    pub fn new(main: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            sub: sub.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ItemStatus::*;
    use super::*;

    #[test]
    fn load_path_edges_are_allowed() {
        assert!(Init.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Idle));
        assert!(Loading.can_transition_to(ProcessingComplete));
        assert!(Loading.can_transition_to(LoadError));
        assert!(LoadError.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Init));
    }

    #[test]
    fn processing_path_edges_are_allowed() {
        assert!(Idle.can_transition_to(ProcessingQueued));
        assert!(ProcessingQueued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(ProcessingComplete));
        assert!(Processing.can_transition_to(ProcessingError));
        assert!(Processing.can_transition_to(Idle));
        assert!(ProcessingError.can_transition_to(ProcessingQueued));
        assert!(ProcessingComplete.can_transition_to(Idle));
        assert!(ProcessingComplete.can_transition_to(ProcessingRevertError));
        assert!(ProcessingRevertError.can_transition_to(ProcessingRevertError));
    }

    #[test]
    fn undefined_edges_are_refused() {
        assert!(!Init.can_transition_to(Processing));
        assert!(!Idle.can_transition_to(ProcessingComplete));
        assert!(!ProcessingComplete.can_transition_to(ProcessingQueued));
        assert!(!LoadError.can_transition_to(Idle));
        assert!(!ProcessingError.can_transition_to(Idle));
        assert!(!Processing.can_transition_to(ProcessingQueued));
    }

    #[test]
    fn only_idle_and_processing_error_can_be_queued() {
        let queueable: Vec<ItemStatus> = [
            Init,
            Idle,
            Loading,
            LoadError,
            ProcessingQueued,
            Processing,
            ProcessingComplete,
            ProcessingError,
            ProcessingRevertError,
        ]
        .into_iter()
        .filter(|s| s.can_queue_for_processing())
        .collect();
        assert_eq!(queueable, vec![Idle, ProcessingError]);
    }
}
