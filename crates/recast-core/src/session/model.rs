//! Session domain model.
//!
//! A session is the unit of persisted work for one character: which
//! fields are selected per stage, how each stage is configured, the
//! current result per stage, and a bounded append-only history of every
//! run. Sessions survive restarts and are never silently deleted.

use crate::selection::StageFieldSelection;
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default bound on `Session::history`; the oldest entries are dropped
/// beyond it.
pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 100;

/// Default per-character session cap enforced by the repository.
pub const DEFAULT_MAX_SESSIONS_PER_CHARACTER: usize = 50;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Active
    }
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }
}

/// Per-stage prompt and schema configuration.
///
/// A preset id takes precedence when present and resolvable; otherwise
/// the inline custom text/schema is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_preset_id: Option<String>,
    #[serde(default)]
    pub custom_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_preset_id: Option<String>,
    #[serde(default)]
    pub custom_schema: String,
    /// Requires a non-empty resolved schema at execution time.
    #[serde(default)]
    pub use_structured_output: bool,
}

/// The immutable record of one stage run.
///
/// Exactly one of `output` (success) or `error` (failure) is meaningful;
/// a cancelled run produces no record at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    /// RFC 3339 completion timestamp.
    pub timestamp: String,
    /// The prompt body sent (or, for validation failures, built) for this run.
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// The user guidance in effect for this run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    /// Builds a successful result.
    pub fn success(stage: Stage, input: String, output: String, guidance: Option<String>) -> Self {
        Self {
            stage,
            timestamp: now_rfc3339(),
            input,
            output: Some(output),
            guidance,
            error: None,
        }
    }

    /// Builds a failed result; still appended to history for auditability.
    pub fn failure(stage: Stage, input: String, error: String, guidance: Option<String>) -> Self {
        Self {
            stage,
            timestamp: now_rfc3339(),
            input,
            output: None,
            guidance,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_some() && self.error.is_none()
    }
}

/// A persisted unit of refinement work for one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUID format)
    pub id: String,
    /// Identifier of the character this session refines
    pub character_id: String,
    /// Character display name at session creation time
    pub character_name: String,
    /// Timestamp when the session was created (RFC 3339)
    pub created_at: String,
    /// Timestamp when the session was last updated (RFC 3339)
    pub updated_at: String,
    /// Field selection state (shared base, linked flag, per-stage overrides)
    #[serde(default)]
    pub stage_fields: StageFieldSelection,
    /// Per-stage prompt/schema configuration
    #[serde(default)]
    pub stage_configs: BTreeMap<Stage, StageConfig>,
    /// The current result per stage; survives history trimming and is
    /// what the UI restores from
    #[serde(default)]
    pub stage_results: BTreeMap<Stage, StageResult>,
    /// Append-only run history, newest last, bounded
    #[serde(default)]
    pub history: Vec<StageResult>,
    /// Number of successful stage runs
    #[serde(default)]
    pub iteration_count: u32,
    /// Free-text guidance injected into every stage prompt
    #[serde(default)]
    pub user_guidance: String,
    #[serde(default)]
    pub status: SessionStatus,
}

impl Session {
    /// Creates a fresh session: empty history, linked selection, active
    /// status.
    pub fn new(character_id: impl Into<String>, character_name: impl Into<String>) -> Self {
        let now = now_rfc3339();
        let stage_configs = Stage::all()
            .into_iter()
            .map(|stage| (stage, StageConfig::default()))
            .collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            character_id: character_id.into(),
            character_name: character_name.into(),
            created_at: now.clone(),
            updated_at: now,
            stage_fields: StageFieldSelection::default(),
            stage_configs,
            stage_results: BTreeMap::new(),
            history: Vec::new(),
            iteration_count: 0,
            user_guidance: String::new(),
            status: SessionStatus::Active,
        }
    }

    /// Bumps `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }

    /// Records a finished stage run.
    ///
    /// Appends to history (trimming the oldest entries beyond
    /// `max_history`) and overwrites the stage's current result, so the
    /// current view never loses data even when history rolls. Only
    /// successful runs count toward `iteration_count`.
    pub fn record_result(&mut self, result: StageResult, max_history: usize) {
        if result.is_success() {
            self.iteration_count += 1;
        }
        self.stage_results.insert(result.stage, result.clone());
        self.history.push(result);
        if self.history.len() > max_history {
            let excess = self.history.len() - max_history;
            self.history.drain(..excess);
        }
        self.touch();
    }

    /// The stage's current configuration, defaulting when never edited.
    pub fn stage_config(&self, stage: Stage) -> StageConfig {
        self.stage_configs.get(&stage).cloned().unwrap_or_default()
    }

    /// Last successful output of the nearest preceding stage, used for
    /// chained refinement.
    pub fn prior_output(&self, stage: Stage) -> Option<&str> {
        let mut cursor = stage.predecessor();
        while let Some(prior) = cursor {
            if let Some(result) = self.stage_results.get(&prior) {
                if result.is_success() {
                    return result.output.as_deref();
                }
            }
            cursor = prior.predecessor();
        }
        None
    }
}

/// Current time as an RFC 3339 string; RFC 3339 strings sort
/// lexicographically in chronological order.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
