//! Key-value backed SessionRepository implementation.
//!
//! Owns the per-session records (`session:{id}`) and the character →
//! session id index (`session_index`) exclusively. Records behind the
//! current shape are migrated forward at load; index/record deviations
//! found at open are self-healed rather than surfaced.

use crate::dto::SessionV2_0_0;
use crate::migration::{INDEX_KEY, MigrationRegistry, SESSION_KEY_PREFIX, session_migrations};
use crate::versioned_store::VersionedStore;
use async_trait::async_trait;
use recast_core::session::{
    DEFAULT_MAX_SESSIONS_PER_CHARACTER, Session, SessionRepository, now_rfc3339,
};
use recast_core::{RecastError, Result};
use semver::Version;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Key of the active session pointer.
const ACTIVE_KEY: &str = "active_session";

/// Character id → ordered list of session ids.
type SessionIndex = BTreeMap<String, Vec<String>>;

/// A repository implementation storing sessions in a [`VersionedStore`].
pub struct KvSessionRepository {
    store: VersionedStore,
    session_migrations: MigrationRegistry,
    max_sessions_per_character: usize,
}

impl KvSessionRepository {
    /// Opens the repository over a versioned store with the default
    /// per-character session cap, self-healing the index first.
    pub async fn new(store: VersionedStore) -> Result<Self> {
        Self::with_session_cap(store, DEFAULT_MAX_SESSIONS_PER_CHARACTER).await
    }

    /// Opens the repository with an explicit per-character session cap.
    pub async fn with_session_cap(
        store: VersionedStore,
        max_sessions_per_character: usize,
    ) -> Result<Self> {
        let repository = Self {
            store,
            session_migrations: session_migrations(),
            max_sessions_per_character,
        };
        repository.heal_index().await?;
        Ok(repository)
    }

    fn session_key(session_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{session_id}")
    }

    async fn load_index(&self) -> Result<SessionIndex> {
        Ok(self.store.get_json(INDEX_KEY).await?.unwrap_or_default())
    }

    async fn save_index(&self, index: &SessionIndex) -> Result<()> {
        self.store.set_json(INDEX_KEY, index).await
    }

    /// Parses a raw record, migrating forward when its `schema_version`
    /// is behind the current session shape.
    fn parse_record(&self, raw: Value) -> Result<Session> {
        let version_str = raw
            .get("schema_version")
            .and_then(Value::as_str)
            // Records from before versioning carry no tag at all.
            .unwrap_or("1.0.0")
            .to_string();
        let version = Version::parse(&version_str).map_err(|e| {
            RecastError::migration(format!(
                "session schema_version '{version_str}' is not semver: {e}"
            ))
        })?;

        let migrated = self
            .session_migrations
            .migrate_to_latest(raw, &version)
            .map_err(|e| RecastError::migration(format!("{e:#}")))?;

        let dto: SessionV2_0_0 = serde_json::from_value(migrated)?;
        Ok(dto.into())
    }

    /// Reconciles the index with the records actually present.
    ///
    /// Orphaned session records are re-indexed and dangling ids dropped;
    /// both are logged, never surfaced as errors.
    async fn heal_index(&self) -> Result<()> {
        let mut stored: BTreeMap<String, String> = BTreeMap::new();
        for key in self.store.data_keys().await? {
            let Some(session_id) = key.strip_prefix(SESSION_KEY_PREFIX) else {
                continue;
            };
            if let Some(record) = self.store.get_json::<Value>(&key).await? {
                let character_id = record
                    .get("character_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                stored.insert(session_id.to_string(), character_id);
            }
        }

        let mut index = self.load_index().await?;
        let mut changed = false;

        for (character_id, ids) in index.iter_mut() {
            let before = ids.len();
            ids.retain(|id| stored.contains_key(id));
            if ids.len() != before {
                tracing::info!(
                    character_id = %character_id,
                    dropped = before - ids.len(),
                    "dropped dangling session ids from index"
                );
                changed = true;
            }
        }
        index.retain(|_, ids| !ids.is_empty());

        let indexed: BTreeSet<&String> = index.values().flatten().collect();
        let orphans: Vec<(String, String)> = stored
            .iter()
            .filter(|(id, _)| !indexed.contains(id))
            .map(|(id, character_id)| (id.clone(), character_id.clone()))
            .collect();
        for (session_id, character_id) in orphans {
            tracing::info!(%session_id, %character_id, "re-indexed orphaned session record");
            index.entry(character_id).or_default().push(session_id);
            changed = true;
        }

        if changed {
            self.save_index(&index).await?;
        }
        Ok(())
    }

    /// Evicts sessions beyond the per-character cap.
    ///
    /// Oldest completed/abandoned sessions go first; the oldest active
    /// ones only when no inactive remain. The session being saved is
    /// never a candidate.
    async fn enforce_session_cap(
        &self,
        index: &mut SessionIndex,
        character_id: &str,
        keep_id: &str,
    ) -> Result<()> {
        let Some(ids) = index.get_mut(character_id) else {
            return Ok(());
        };
        if ids.len() <= self.max_sessions_per_character {
            return Ok(());
        }

        let mut candidates = Vec::new();
        for id in ids.iter() {
            if id == keep_id {
                continue;
            }
            if let Some(raw) = self.store.get_json::<Value>(&Self::session_key(id)).await? {
                let active = raw.get("status").and_then(Value::as_str) == Some("active");
                let updated_at = raw
                    .get("updated_at")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                candidates.push((id.clone(), active, updated_at));
            }
        }
        // Inactive before active, oldest first within each group.
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));

        let excess = ids.len() - self.max_sessions_per_character;
        for (victim, _, _) in candidates.into_iter().take(excess) {
            tracing::info!(
                session_id = %victim,
                character_id,
                "evicting session beyond per-character cap"
            );
            self.store.remove(&Self::session_key(&victim)).await?;
            ids.retain(|id| id != &victim);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for KvSessionRepository {
    async fn create(&self, character_id: &str, character_name: &str) -> Result<Session> {
        let session = Session::new(character_id, character_name);
        self.store
            .set_json(&Self::session_key(&session.id), &SessionV2_0_0::from(&session))
            .await?;

        let mut index = self.load_index().await?;
        index
            .entry(character_id.to_string())
            .or_default()
            .push(session.id.clone());
        self.save_index(&index).await?;

        tracing::debug!(session_id = %session.id, character_id, "created session");
        Ok(session)
    }

    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        match self
            .store
            .get_json::<Value>(&Self::session_key(session_id))
            .await?
        {
            Some(raw) => Ok(Some(self.parse_record(raw)?)),
            None => Ok(None),
        }
    }

    async fn list_for_character(&self, character_id: &str) -> Result<Vec<Session>> {
        let index = self.load_index().await?;
        let ids = index.get(character_id).cloned().unwrap_or_default();

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.find_by_id(&id).await? {
                Some(session) => sessions.push(session),
                None => tracing::warn!(session_id = %id, "indexed session has no record"),
            }
        }
        // Most recently updated first; RFC 3339 sorts chronologically.
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut dto = SessionV2_0_0::from(session);
        dto.updated_at = now_rfc3339();
        self.store
            .set_json(&Self::session_key(&session.id), &dto)
            .await?;

        let mut index = self.load_index().await?;
        let ids = index.entry(session.character_id.clone()).or_default();
        if !ids.contains(&session.id) {
            ids.push(session.id.clone());
        }
        self.enforce_session_cap(&mut index, &session.character_id, &session.id)
            .await?;
        self.save_index(&index).await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.store.remove(&Self::session_key(session_id)).await?;

        let mut index = self.load_index().await?;
        let mut changed = false;
        for ids in index.values_mut() {
            let before = ids.len();
            ids.retain(|id| id != session_id);
            changed |= ids.len() != before;
        }
        if changed {
            index.retain(|_, ids| !ids.is_empty());
            self.save_index(&index).await?;
        }

        if self.get_active_session_id().await?.as_deref() == Some(session_id) {
            self.set_active_session_id(None).await?;
        }
        Ok(())
    }

    async fn get_active_session_id(&self) -> Result<Option<String>> {
        self.store.get_json(ACTIVE_KEY).await
    }

    async fn set_active_session_id(&self, session_id: Option<&str>) -> Result<()> {
        match session_id {
            Some(id) => self.store.set_json(ACTIVE_KEY, &id).await,
            None => self.store.remove(ACTIVE_KEY).await,
        }
    }
}
