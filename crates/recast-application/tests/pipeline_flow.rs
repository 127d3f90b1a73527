//! End-to-end flows over a real file-backed store: run stages, restart,
//! migrate legacy data forward, degrade on downgrade.

use async_trait::async_trait;
use recast_application::{Observers, PipelineEngine, SessionService};
use recast_core::Result;
use recast_core::generation::{
    GenerationClient, GenerationRequest, GenerationResponse, TracingNotifier,
};
use recast_core::preset::PresetRegistry;
use recast_core::selection::SelectionEntry;
use recast_core::session::SessionRepository;
use recast_core::stage::Stage;
use recast_infrastructure::migration::storage_migrations;
use recast_infrastructure::storage::FileKeyValueStore;
use recast_infrastructure::{KvSessionRepository, VersionedStore};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct EchoClient;

#[async_trait]
impl GenerationClient for EchoClient {
    async fn generate(
        &self,
        request: GenerationRequest,
        _cancel: CancellationToken,
    ) -> Result<GenerationResponse> {
        Ok(GenerationResponse {
            text: format!("echo:{}", request.system_prompt),
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn open_repository(dir: &Path) -> Arc<dyn SessionRepository> {
    let store = Arc::new(FileKeyValueStore::new(dir).unwrap());
    let versioned = VersionedStore::open(store, &storage_migrations())
        .await
        .unwrap();
    Arc::new(KvSessionRepository::new(versioned).await.unwrap())
}

fn document() -> serde_json::Value {
    json!({"data": {"description": "A sea-worn navigator.", "personality": "Wry"}})
}

#[tokio::test]
async fn test_full_flow_survives_restart() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();

    let session_id = {
        let repository = open_repository(dir.path()).await;
        let observers = Observers::new();
        let service = SessionService::new(repository.clone(), observers.clone());
        let engine = PipelineEngine::new(
            Arc::new(EchoClient),
            repository.clone(),
            Arc::new(PresetRegistry::new()),
            Arc::new(TracingNotifier),
            observers,
        );

        let mut session = service.ensure_session("char-1", "Aria").await.unwrap();
        service
            .select_fields(
                &mut session,
                Stage::Score,
                [("description".to_string(), SelectionEntry::Whole(true))]
                    .into_iter()
                    .collect(),
            )
            .await
            .unwrap();
        session
            .stage_configs
            .get_mut(&Stage::Score)
            .unwrap()
            .custom_prompt = "Rate 1-10".to_string();
        session
            .stage_configs
            .get_mut(&Stage::Rewrite)
            .unwrap()
            .custom_prompt = "Rewrite it".to_string();

        let results = engine
            .run_pipeline(&mut session, &[Stage::Score, Stage::Rewrite], &document())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].output.as_deref(), Some("echo:Rate 1-10"));
        session.id.clone()
    };

    // "Restart": a fresh repository over the same directory.
    let repository = open_repository(dir.path()).await;
    let restored = repository.find_by_id(&session_id).await.unwrap().unwrap();
    assert_eq!(restored.iteration_count, 2);
    assert_eq!(restored.history.len(), 2);
    assert_eq!(
        restored.stage_results[&Stage::Rewrite].output.as_deref(),
        Some("echo:Rewrite it")
    );
    // The rewrite chained from the score output.
    assert!(
        restored.stage_results[&Stage::Rewrite]
            .input
            .contains("echo:Rate 1-10")
    );

    let listed = repository.list_for_character("char-1").await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_legacy_store_migrates_end_to_end() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();

    // A V1-layout store: monolithic sessions blob, legacy record shape.
    fs::write(dir.path().join("meta.json"), json!({"version": "1.0.0"}).to_string()).unwrap();
    fs::write(
        dir.path().join("sessions.json"),
        json!([{
            "schema_version": "1.0.0",
            "id": "s-legacy",
            "character_id": "char-1",
            "character_name": "Aria",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "selected_fields": {"description": true, "alternate_greetings": [0, 2]},
            "iteration_count": 7
        }])
        .to_string(),
    )
    .unwrap();

    let repository = open_repository(dir.path()).await;

    let sessions = repository.list_for_character("char-1").await.unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.id, "s-legacy");
    assert_eq!(session.iteration_count, 7);
    assert!(session.stage_fields.linked);
    assert_eq!(
        session.stage_fields.base.get("alternate_greetings"),
        Some(&SelectionEntry::Items(vec![0, 2]))
    );

    // The monolithic blob is gone; the layout is per-record now.
    assert!(!dir.path().join("sessions.json").exists());
    assert!(dir.path().join("session__s-legacy.json").exists());
    let meta = fs::read_to_string(dir.path().join("meta.json")).unwrap();
    assert!(meta.contains("2.0.0"));
}

#[tokio::test]
async fn test_downgrade_degrades_to_ephemeral_but_keeps_data() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("meta.json"), json!({"version": "9.9.9"}).to_string()).unwrap();
    fs::write(dir.path().join("session__future.json"), "{}").unwrap();

    let store = Arc::new(FileKeyValueStore::new(dir.path()).unwrap());
    let versioned =
        VersionedStore::open_or_ephemeral(store, &storage_migrations(), &TracingNotifier).await;
    let repository: Arc<dyn SessionRepository> =
        Arc::new(KvSessionRepository::new(versioned).await.unwrap());

    // The engine keeps operating, just without persistence.
    let session = repository.create("char-1", "Aria").await.unwrap();
    assert!(
        repository
            .find_by_id(&session.id)
            .await
            .unwrap()
            .is_some()
    );

    // The newer on-disk data was not touched.
    let meta = fs::read_to_string(dir.path().join("meta.json")).unwrap();
    assert!(meta.contains("9.9.9"));
    assert!(dir.path().join("session__future.json").exists());
}
