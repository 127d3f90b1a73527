//! Storage-level migrations.
//!
//! These steps transform a whole-store snapshot (key → JSON value)
//! between storage layouts. They are pure: the versioned store only
//! writes the result back once the entire chain has succeeded, so a
//! partially-completed prior run (detected via the stamped version)
//! simply re-runs from its recorded version.

use super::registry::MigrationRegistry;
use super::traits::{Migration, ValueMigration};
use anyhow::{Context, Result};
use semver::Version;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Storage layout version of the original monolithic layout.
pub const STORAGE_V1: &str = "1.0.0";

/// Current storage layout version.
pub const STORAGE_VERSION: &str = "2.0.0";

/// Key of the legacy monolithic session blob (V1 layout).
const LEGACY_SESSIONS_KEY: &str = "sessions";

/// Key prefix for per-session records (V2 layout).
pub const SESSION_KEY_PREFIX: &str = "session:";

/// Key of the character → session id index (V2 layout).
pub const INDEX_KEY: &str = "session_index";

/// Migration from storage layout 1.0.0 to 2.0.0.
///
/// V1 kept every session in one monolithic `sessions` array. V2 stores
/// each session under `session:{id}` and maintains a `session_index`
/// mapping character ids to their ordered session id lists. Unrelated
/// keys pass through untouched.
#[derive(Debug)]
pub struct StoreV1ToV2Migration;

impl Migration for StoreV1ToV2Migration {
    fn from_version(&self) -> Version {
        Version::parse(STORAGE_V1).expect("invalid V1 storage version")
    }

    fn to_version(&self) -> Version {
        Version::parse(STORAGE_VERSION).expect("invalid storage version")
    }

    fn description(&self) -> &str {
        "Split the monolithic sessions blob into per-id records plus a character index"
    }
}

impl ValueMigration for StoreV1ToV2Migration {
    fn migrate(&self, value: Value) -> Result<Value> {
        let mut snapshot: Map<String, Value> = match value {
            Value::Object(map) => map,
            other => anyhow::bail!("store snapshot is not an object: {other}"),
        };

        let legacy = snapshot.remove(LEGACY_SESSIONS_KEY).unwrap_or(Value::Array(vec![]));
        let sessions = legacy
            .as_array()
            .cloned()
            .context("legacy 'sessions' entry is not an array")?;

        let mut index: Map<String, Value> = Map::new();
        for record in sessions {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .context("legacy session record has no id")?
                .to_string();
            let character_id = record
                .get("character_id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();

            let ids = index
                .entry(character_id)
                .or_insert_with(|| Value::Array(vec![]));
            if let Value::Array(list) = ids {
                list.push(Value::String(id.clone()));
            }
            snapshot.insert(format!("{SESSION_KEY_PREFIX}{id}"), record);
        }

        snapshot.insert(INDEX_KEY.to_string(), Value::Object(index));
        Ok(Value::Object(snapshot))
    }
}

/// The storage layout migration chain, V1.0.0 → current.
pub fn storage_migrations() -> MigrationRegistry {
    let mut registry =
        MigrationRegistry::new(Version::parse(STORAGE_VERSION).expect("invalid storage version"));
    registry.register(Arc::new(StoreV1ToV2Migration));
    registry
}
