//! Versioned session DTOs.
//!
//! The domain `Session` never carries a version; persistence does. Each
//! stored record is tagged with its own `schema_version`, checked
//! independently of the storage-level version, and migrated forward at
//! load through the session migration chain.

use recast_core::selection::{FieldSelection, StageFieldSelection};
use recast_core::session::{Session, SessionStatus, StageConfig, StageResult};
use recast_core::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version of the legacy session shape.
pub const SESSION_SCHEMA_V1: &str = "1.0.0";

/// Schema version new session records are written with.
pub const SESSION_SCHEMA_VERSION: &str = "2.0.0";

/// Represents V1.0.0 of the session record schema.
///
/// Legacy shape: a single flat `selected_fields` map shared by all
/// stages, with no linking or per-stage overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionV1_0_0 {
    #[serde(default = "v1_version")]
    pub schema_version: String,
    pub id: String,
    pub character_id: String,
    pub character_name: String,
    pub created_at: String,
    pub updated_at: String,
    /// One selection for every stage (replaced by `stage_fields` in V2)
    #[serde(default)]
    pub selected_fields: FieldSelection,
    #[serde(default)]
    pub stage_configs: BTreeMap<Stage, StageConfig>,
    #[serde(default)]
    pub stage_results: BTreeMap<Stage, StageResult>,
    #[serde(default)]
    pub history: Vec<StageResult>,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default)]
    pub user_guidance: String,
    #[serde(default)]
    pub status: SessionStatus,
}

fn v1_version() -> String {
    SESSION_SCHEMA_V1.to_string()
}

/// Represents V2.0.0 of the session record schema.
///
/// Replaced `selected_fields` with the linked/override selection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionV2_0_0 {
    pub schema_version: String,
    pub id: String,
    pub character_id: String,
    pub character_name: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub stage_fields: StageFieldSelection,
    #[serde(default)]
    pub stage_configs: BTreeMap<Stage, StageConfig>,
    #[serde(default)]
    pub stage_results: BTreeMap<Stage, StageResult>,
    #[serde(default)]
    pub history: Vec<StageResult>,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default)]
    pub user_guidance: String,
    #[serde(default)]
    pub status: SessionStatus,
}

/// Convert the latest DTO to the domain model.
impl From<SessionV2_0_0> for Session {
    fn from(dto: SessionV2_0_0) -> Self {
        Session {
            id: dto.id,
            character_id: dto.character_id,
            character_name: dto.character_name,
            created_at: dto.created_at,
            updated_at: dto.updated_at,
            stage_fields: dto.stage_fields,
            stage_configs: dto.stage_configs,
            stage_results: dto.stage_results,
            history: dto.history,
            iteration_count: dto.iteration_count,
            user_guidance: dto.user_guidance,
            status: dto.status,
        }
    }
}

/// Convert the domain model to the latest DTO for persistence.
///
/// Always saves with the current schema version.
impl From<&Session> for SessionV2_0_0 {
    fn from(session: &Session) -> Self {
        SessionV2_0_0 {
            schema_version: SESSION_SCHEMA_VERSION.to_string(),
            id: session.id.clone(),
            character_id: session.character_id.clone(),
            character_name: session.character_name.clone(),
            created_at: session.created_at.clone(),
            updated_at: session.updated_at.clone(),
            stage_fields: session.stage_fields.clone(),
            stage_configs: session.stage_configs.clone(),
            stage_results: session.stage_results.clone(),
            history: session.history.clone(),
            iteration_count: session.iteration_count,
            user_guidance: session.user_guidance.clone(),
            status: session.status,
        }
    }
}
