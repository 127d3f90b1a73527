//! Session record migrations.
//!
//! Each stored session record carries its own `schema_version`, checked
//! at load independently of the storage-level version. Records behind the
//! current shape are migrated forward here and rewritten at their next
//! save.

use super::registry::MigrationRegistry;
use super::traits::{Migration, ValueMigration};
use crate::dto::{SESSION_SCHEMA_V1, SESSION_SCHEMA_VERSION, SessionV1_0_0, SessionV2_0_0};
use anyhow::{Context, Result};
use recast_core::selection::StageFieldSelection;
use semver::Version;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Migration from SessionV1_0_0 (1.0.0) to SessionV2_0_0 (2.0.0).
///
/// Changes:
/// - Replace the flat `selected_fields` map with `stage_fields`,
///   synthesizing a linked selection whose `base` is the legacy value.
///   The legacy field is dropped from the canonical shape.
#[derive(Debug)]
pub struct SessionV1ToV2Migration;

impl Migration for SessionV1ToV2Migration {
    fn from_version(&self) -> Version {
        Version::parse(SESSION_SCHEMA_V1).expect("invalid V1 session version")
    }

    fn to_version(&self) -> Version {
        Version::parse(SESSION_SCHEMA_VERSION).expect("invalid session schema version")
    }

    fn description(&self) -> &str {
        "Replace flat selected_fields with linked per-stage stage_fields"
    }
}

impl ValueMigration for SessionV1ToV2Migration {
    fn migrate(&self, value: Value) -> Result<Value> {
        let v1: SessionV1_0_0 =
            serde_json::from_value(value).context("session record does not match the V1 shape")?;

        let v2 = SessionV2_0_0 {
            schema_version: SESSION_SCHEMA_VERSION.to_string(),
            id: v1.id,
            character_id: v1.character_id,
            character_name: v1.character_name,
            created_at: v1.created_at,
            updated_at: v1.updated_at,
            stage_fields: StageFieldSelection {
                base: v1.selected_fields,
                linked: true,
                overrides: BTreeMap::new(),
            },
            stage_configs: v1.stage_configs,
            stage_results: v1.stage_results,
            history: v1.history,
            iteration_count: v1.iteration_count,
            user_guidance: v1.user_guidance,
            status: v1.status,
        };

        serde_json::to_value(v2).context("failed to serialize migrated session record")
    }
}

/// The session record migration chain, V1.0.0 → current.
pub fn session_migrations() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new(
        Version::parse(SESSION_SCHEMA_VERSION).expect("invalid session schema version"),
    );
    registry.register(Arc::new(SessionV1ToV2Migration));
    registry
}
