//! Change notification events.
//!
//! The engine fires one event after each committed mutation. Consumers
//! (typically a rendering layer) subscribe through [`ChangeObserver`];
//! batching and debouncing are their concern, not the core's.

use crate::stage::Stage;
use serde::{Deserialize, Serialize};

/// A committed mutation of session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A stage's field selection (or the linked flag) changed.
    SelectionChanged {
        session_id: String,
        stage: Stage,
    },
    /// A stage run finished and its result was recorded.
    StageCompleted {
        session_id: String,
        stage: Stage,
    },
    /// The session was persisted.
    SessionSaved {
        session_id: String,
    },
    /// The session was removed.
    SessionDeleted {
        session_id: String,
    },
}

/// Observer hook fired after each committed mutation.
///
/// Implementations must not block; fire-and-forget.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}
