//! Pipeline stage enumeration and per-stage execution state.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// A named step of the refinement pipeline.
///
/// The set of stages is a fixed, closed enumeration; declaration order
/// is the default pipeline order. A pipeline run may use any ordered
/// subset of these, but never a stage outside this set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Rate the selected fields and explain the rating.
    Score,
    /// Produce an improved rewrite of the selected fields.
    Rewrite,
    /// Analyze the rewrite against the original material.
    Analyze,
}

impl Stage {
    /// All stages in default pipeline order.
    pub fn all() -> [Stage; 3] {
        [Stage::Score, Stage::Rewrite, Stage::Analyze]
    }

    /// The stage immediately preceding this one in declaration order,
    /// if any. Used for chained refinement: a stage's prompt may carry
    /// the nearest preceding stage's last successful output.
    pub fn predecessor(&self) -> Option<Stage> {
        match self {
            Stage::Score => None,
            Stage::Rewrite => Some(Stage::Score),
            Stage::Analyze => Some(Stage::Rewrite),
        }
    }
}

/// Execution state of one stage within a session.
///
/// Transitions: `Pending → Running → {Complete | Error}`. A stage can be
/// re-run from either terminal state, and `Running → Pending` is reachable
/// only through cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Complete,
    Error,
}

impl Default for StageState {
    fn default() -> Self {
        StageState::Pending
    }
}

impl StageState {
    /// True when a new run may be started from this state.
    pub fn can_start(&self) -> bool {
        !matches!(self, StageState::Running)
    }
}
