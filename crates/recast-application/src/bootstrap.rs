//! Engine bootstrap.
//!
//! Wires configuration into a ready-to-use stack: file-backed store
//! (degrading to ephemeral when the persisted data is unusable), session
//! repository with the configured cap, shared observer set, session
//! service and pipeline engine.

use crate::observers::Observers;
use crate::pipeline::PipelineEngine;
use crate::service::SessionService;
use recast_core::Result;
use recast_core::generation::{GenerationClient, Notifier};
use recast_core::preset::PresetRegistry;
use recast_core::session::SessionRepository;
use recast_infrastructure::migration::storage_migrations;
use recast_infrastructure::storage::FileKeyValueStore;
use recast_infrastructure::{KvSessionRepository, RecastConfig, VersionedStore};
use std::sync::Arc;

/// The assembled engine stack.
pub struct RecastRuntime {
    pub repository: Arc<dyn SessionRepository>,
    pub presets: Arc<PresetRegistry>,
    pub observers: Observers,
    pub service: SessionService,
    pub engine: PipelineEngine,
}

/// Builds the full stack from configuration.
///
/// Storage problems (incompatible version, failed migration) degrade to
/// ephemeral operation with one loud warning — the host application
/// keeps running either way.
pub async fn bootstrap(
    config: &RecastConfig,
    generation: Arc<dyn GenerationClient>,
    notifier: Arc<dyn Notifier>,
) -> Result<RecastRuntime> {
    let base_dir = config.resolved_base_dir()?;
    tracing::info!(base_dir = %base_dir.display(), "opening session storage");

    let store = Arc::new(FileKeyValueStore::new(&base_dir)?);
    let versioned =
        VersionedStore::open_or_ephemeral(store, &storage_migrations(), notifier.as_ref()).await;

    let repository: Arc<dyn SessionRepository> = Arc::new(
        KvSessionRepository::with_session_cap(versioned, config.max_sessions_per_character).await?,
    );

    let presets = Arc::new(PresetRegistry::new());
    let observers = Observers::new();
    let service = SessionService::new(repository.clone(), observers.clone());
    let engine = PipelineEngine::new(
        generation,
        repository.clone(),
        presets.clone(),
        notifier,
        observers.clone(),
    )
    .with_max_history(config.max_history_entries);

    Ok(RecastRuntime {
        repository,
        presets,
        observers,
        service,
        engine,
    })
}
