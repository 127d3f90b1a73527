//! Versioned store: storage metadata, forward migration, fail-closed
//! downgrade handling.
//!
//! Every value in the store is a JSON document. On open, the persisted
//! [`StorageMeta`] version is compared against the registry's latest:
//! older data is migrated forward as one pure snapshot transform, a
//! missing meta is a fresh install (stamped directly, no migration), and
//! newer data fails closed rather than risking truncation. The stamped
//! version is the only migration progress marker, so re-running after a
//! partial failure is safe.

use crate::migration::MigrationRegistry;
use crate::storage::{KeyValueStore, MemoryKeyValueStore};
use recast_core::generation::Notifier;
use recast_core::session::now_rfc3339;
use recast_core::{RecastError, Result};
use semver::Version;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Key of the storage metadata record.
const META_KEY: &str = "meta";

/// Process-wide storage metadata; rewritten whenever a migration runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMeta {
    /// Storage layout version (semver string).
    pub version: String,
    /// RFC 3339 timestamp of the last migration run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_migration: Option<String>,
}

/// A key-value store with a stamped schema version and forward migration.
pub struct VersionedStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore").finish_non_exhaustive()
    }
}

impl VersionedStore {
    /// Opens the store, migrating forward if the persisted version is
    /// behind the registry's latest.
    ///
    /// # Errors
    ///
    /// - [`RecastError::StorageIncompatibleVersion`] when the persisted
    ///   version is newer than this build supports (downgrade scenario);
    ///   nothing is modified.
    /// - [`RecastError::Migration`] when the chain fails; the persisted
    ///   data is left untouched.
    pub async fn open(store: Arc<dyn KeyValueStore>, registry: &MigrationRegistry) -> Result<Self> {
        let versioned = Self { store };
        let latest = registry.latest_version();

        let meta = versioned.get_json::<StorageMeta>(META_KEY).await?;
        let Some(meta) = meta else {
            // Fresh install: stamp the current version directly.
            tracing::info!(version = %latest, "no storage meta found, stamping fresh install");
            versioned
                .set_json(
                    META_KEY,
                    &StorageMeta {
                        version: latest.to_string(),
                        last_migration: None,
                    },
                )
                .await?;
            return Ok(versioned);
        };

        let found = Version::parse(&meta.version).map_err(|e| {
            RecastError::migration(format!("stored version '{}' is not semver: {e}", meta.version))
        })?;

        if &found == latest {
            tracing::debug!(version = %found, "storage is at the current version");
            return Ok(versioned);
        }
        if &found > latest {
            return Err(RecastError::StorageIncompatibleVersion {
                found: found.to_string(),
                supported: latest.to_string(),
            });
        }

        versioned.migrate(registry, &found).await?;
        Ok(versioned)
    }

    /// Opens the store, degrading to an ephemeral in-memory store when the
    /// persisted data is unusable (incompatible version or failed
    /// migration).
    ///
    /// The persisted data is left untouched for a later build to resolve;
    /// the engine keeps operating without persisted sessions, with a
    /// single loud warning through the notification sink.
    pub async fn open_or_ephemeral(
        store: Arc<dyn KeyValueStore>,
        registry: &MigrationRegistry,
        notifier: &dyn Notifier,
    ) -> Self {
        match Self::open(store, registry).await {
            Ok(versioned) => versioned,
            Err(e) => {
                tracing::warn!(error = %e, "persisted data unusable, degrading to ephemeral storage");
                notifier.error(&format!(
                    "Persisted session data could not be used ({e}). \
                     Continuing without persistence; existing data is untouched."
                ));
                let memory: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
                match Self::open(Arc::clone(&memory), registry).await {
                    Ok(versioned) => versioned,
                    // A memory store cannot fail; keep the engine alive regardless.
                    Err(inner) => {
                        tracing::error!(error = %inner, "ephemeral store failed to initialize");
                        Self { store: memory }
                    }
                }
            }
        }
    }

    /// Runs the migration chain over a whole-store snapshot and writes the
    /// result back, stamping the meta record last.
    async fn migrate(&self, registry: &MigrationRegistry, from: &Version) -> Result<()> {
        let mut snapshot = Map::new();
        for key in self.store.keys().await? {
            if key == META_KEY {
                continue;
            }
            if let Some(raw) = self.store.get(&key).await? {
                let value: Value = serde_json::from_str(&raw).map_err(|e| {
                    RecastError::migration(format!("entry '{key}' is not valid JSON: {e}"))
                })?;
                snapshot.insert(key, value);
            }
        }
        let before: Vec<String> = snapshot.keys().cloned().collect();

        let migrated = registry
            .migrate_to_latest(Value::Object(snapshot), from)
            .map_err(|e| RecastError::migration(format!("{e:#}")))?;
        let Value::Object(entries) = migrated else {
            return Err(RecastError::migration(
                "migration chain did not return an object snapshot".to_string(),
            ));
        };

        for key in before {
            if !entries.contains_key(&key) {
                self.store.remove(&key).await?;
            }
        }
        for (key, value) in &entries {
            self.store.set(key, &serde_json::to_string(value)?).await?;
        }

        self.set_json(
            META_KEY,
            &StorageMeta {
                version: registry.latest_version().to_string(),
                last_migration: Some(now_rfc3339()),
            },
        )
        .await?;
        Ok(())
    }

    /// Reads and deserializes a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serializes and writes a JSON value.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.store.set(key, &serde_json::to_string(value)?).await
    }

    /// Removes a key; absent keys are a no-op.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key).await
    }

    /// All keys except the meta record.
    pub async fn data_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|k| k != META_KEY)
            .collect())
    }

    /// The current storage metadata.
    pub async fn meta(&self) -> Result<Option<StorageMeta>> {
        self.get_json(META_KEY).await
    }
}
