//! Pipeline engine: the per-stage execution state machine.
//!
//! The engine holds a transient working view of run state (stage
//! statuses, at most one active run per session) and writes results back
//! through the session repository — it never touches storage directly.
//! Cancellation is cooperative: each run gets its own token, and a
//! response arriving after cancellation is discarded.

use crate::observers::Observers;
use crate::prompt::build_stage_prompt;
use recast_core::character::CHARACTER_FIELDS;
use recast_core::generation::{GenerationClient, GenerationRequest, Notifier};
use recast_core::preset::PresetRegistry;
use recast_core::selection::resolve_fields;
use recast_core::session::{
    ChangeEvent, DEFAULT_MAX_HISTORY_ENTRIES, Session, SessionRepository, StageConfig, StageResult,
};
use recast_core::stage::{Stage, StageState};
use recast_core::{RecastError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// The single in-flight run of a session.
struct ActiveRun {
    stage: Stage,
    token: CancellationToken,
}

/// Transient run state for one session.
#[derive(Default)]
struct RunState {
    statuses: BTreeMap<Stage, StageState>,
    active: Option<ActiveRun>,
}

/// Drives stage runs against the generation collaborator and records
/// their results into sessions.
///
/// There is no global "current session": every call takes the session it
/// operates on, so multiple independent sessions can be driven from one
/// process. Per session, at most one stage may be running at a time; a
/// second start is rejected, not queued.
pub struct PipelineEngine {
    generation: Arc<dyn GenerationClient>,
    repository: Arc<dyn SessionRepository>,
    presets: Arc<PresetRegistry>,
    notifier: Arc<dyn Notifier>,
    observers: Observers,
    runs: Mutex<HashMap<String, RunState>>,
    max_history_entries: usize,
}

impl PipelineEngine {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        repository: Arc<dyn SessionRepository>,
        presets: Arc<PresetRegistry>,
        notifier: Arc<dyn Notifier>,
        observers: Observers,
    ) -> Self {
        Self {
            generation,
            repository,
            presets,
            notifier,
            observers,
            runs: Mutex::new(HashMap::new()),
            max_history_entries: DEFAULT_MAX_HISTORY_ENTRIES,
        }
    }

    /// Overrides the history bound (defaults to 100 entries).
    pub fn with_max_history(mut self, max_history_entries: usize) -> Self {
        self.max_history_entries = max_history_entries;
        self
    }

    /// The current execution state of a stage.
    ///
    /// This view is transient: it reflects runs of this engine instance,
    /// not persisted results (the UI restores those from
    /// `Session::stage_results`).
    pub async fn stage_state(&self, session_id: &str, stage: Stage) -> StageState {
        let runs = self.runs.lock().await;
        runs.get(session_id)
            .and_then(|state| state.statuses.get(&stage).copied())
            .unwrap_or_default()
    }

    /// Cancels the session's active run, if any.
    ///
    /// Returns true when a run was signalled. The generation collaborator
    /// is contracted to settle promptly after the signal.
    pub async fn abort(&self, session_id: &str) -> bool {
        let runs = self.runs.lock().await;
        if let Some(ActiveRun { stage, token }) =
            runs.get(session_id).and_then(|state| state.active.as_ref())
        {
            tracing::info!(session_id, stage = %stage, "aborting active run");
            token.cancel();
            return true;
        }
        false
    }

    /// Runs one stage.
    ///
    /// Builds the stage input from the effective field selection, the
    /// resolved prompt, the running guidance and the nearest preceding
    /// stage's output; issues exactly one generation request; records the
    /// outcome into the session and persists it.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(result))`: the run finished; `result.error` is set for
    ///   validation/transport failures (still recorded for auditability).
    /// - `Ok(None)`: the run was cancelled. No result is recorded — a
    ///   cancelled run leaves no trace — and the stage returns to
    ///   `Pending`.
    /// - `Err(_)`: the run could not start (another run is active) or a
    ///   storage failure occurred.
    pub async fn run_stage(
        &self,
        session: &mut Session,
        stage: Stage,
        document: &Value,
    ) -> Result<Option<StageResult>> {
        let token = self.begin_run(&session.id, stage).await?;

        let config = session.stage_config(stage);
        let fields = resolve_fields(
            session.stage_fields.effective(stage),
            document,
            &CHARACTER_FIELDS,
        );
        let prompt_text = self.presets.resolve_prompt(
            config.prompt_preset_id.as_deref(),
            &config.custom_prompt,
            stage,
        );
        let guidance = {
            let text = session.user_guidance.trim();
            (!text.is_empty()).then(|| text.to_string())
        };
        let prompt = build_stage_prompt(
            &prompt_text,
            &fields,
            session.prior_output(stage),
            guidance.as_deref(),
        );

        // Validation happens before any request is sent.
        let schema = match self.resolve_schema(&config, stage) {
            Ok(schema) => schema,
            Err(e) => {
                let result = self
                    .finish_failure(session, stage, prompt.user_prompt, e.to_string(), guidance)
                    .await?;
                return Ok(Some(result));
            }
        };

        let request = GenerationRequest {
            system_prompt: prompt.system_prompt,
            user_prompt: prompt.user_prompt.clone(),
            schema,
        };

        // Exactly one outstanding request per run. The biased arm order
        // makes a cancellation that raced a late response win, so a
        // cancelled stage is never retroactively completed.
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.generation.generate(request, token.clone()) => Some(result),
        };

        match outcome {
            None => {
                self.finish_cancelled(&session.id, stage).await;
                Ok(None)
            }
            Some(Err(e)) if e.is_cancelled() => {
                self.finish_cancelled(&session.id, stage).await;
                Ok(None)
            }
            Some(Ok(response)) => {
                let result = self
                    .finish_success(session, stage, prompt.user_prompt, response.text, guidance)
                    .await?;
                Ok(Some(result))
            }
            Some(Err(e)) => {
                let result = self
                    .finish_failure(session, stage, prompt.user_prompt, e.to_string(), guidance)
                    .await?;
                Ok(Some(result))
            }
        }
    }

    /// Runs an ordered list of stages.
    ///
    /// Per-stage validation and transport failures are recorded and do
    /// not abort the batch; each remaining stage still attempts to
    /// execute. Cancellation stops the remainder.
    pub async fn run_pipeline(
        &self,
        session: &mut Session,
        stages: &[Stage],
        document: &Value,
    ) -> Result<Vec<StageResult>> {
        let mut results = Vec::with_capacity(stages.len());
        for &stage in stages {
            match self.run_stage(session, stage, document).await? {
                Some(result) => results.push(result),
                None => {
                    tracing::info!(session_id = %session.id, stage = %stage, "pipeline run cancelled");
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Claims the session's single run slot.
    async fn begin_run(&self, session_id: &str, stage: Stage) -> Result<CancellationToken> {
        let mut runs = self.runs.lock().await;
        let state = runs.entry(session_id.to_string()).or_default();
        if let Some(active) = &state.active {
            return Err(RecastError::execution(format!(
                "stage '{}' is already running for this session; cancel it first",
                active.stage
            )));
        }
        // One token per run, never reused across runs.
        let token = CancellationToken::new();
        state.active = Some(ActiveRun {
            stage,
            token: token.clone(),
        });
        state.statuses.insert(stage, StageState::Running);
        Ok(token)
    }

    /// Releases the run slot, leaving the stage in `state`.
    async fn end_run(&self, session_id: &str, stage: Stage, state: StageState) {
        let mut runs = self.runs.lock().await;
        if let Some(run_state) = runs.get_mut(session_id) {
            run_state.active = None;
            run_state.statuses.insert(stage, state);
        }
    }

    fn resolve_schema(&self, config: &StageConfig, stage: Stage) -> Result<Option<Value>> {
        let schema =
            self.presets
                .resolve_schema(config.schema_preset_id.as_deref(), &config.custom_schema, stage)?;
        if config.use_structured_output && schema.is_none() {
            return Err(RecastError::validation(
                "structured output is enabled but no schema resolves for this stage",
            ));
        }
        Ok(if config.use_structured_output {
            schema
        } else {
            None
        })
    }

    async fn finish_success(
        &self,
        session: &mut Session,
        stage: Stage,
        input: String,
        output: String,
        guidance: Option<String>,
    ) -> Result<StageResult> {
        self.end_run(&session.id, stage, StageState::Complete).await;

        let result = StageResult::success(stage, input, output, guidance);
        session.record_result(result.clone(), self.max_history_entries);
        self.repository.save(session).await?;

        tracing::info!(session_id = %session.id, stage = %stage, "stage completed");
        self.notifier.info(&format!("Stage '{stage}' completed"));
        self.observers.notify(&ChangeEvent::StageCompleted {
            session_id: session.id.clone(),
            stage,
        });
        self.observers.notify(&ChangeEvent::SessionSaved {
            session_id: session.id.clone(),
        });
        Ok(result)
    }

    async fn finish_failure(
        &self,
        session: &mut Session,
        stage: Stage,
        input: String,
        error: String,
        guidance: Option<String>,
    ) -> Result<StageResult> {
        self.end_run(&session.id, stage, StageState::Error).await;

        let result = StageResult::failure(stage, input, error.clone(), guidance);
        session.record_result(result.clone(), self.max_history_entries);
        self.repository.save(session).await?;

        tracing::warn!(session_id = %session.id, stage = %stage, %error, "stage failed");
        self.notifier.error(&format!("Stage '{stage}' failed: {error}"));
        self.observers.notify(&ChangeEvent::StageCompleted {
            session_id: session.id.clone(),
            stage,
        });
        self.observers.notify(&ChangeEvent::SessionSaved {
            session_id: session.id.clone(),
        });
        Ok(result)
    }

    /// A cancelled run leaves no trace: nothing is recorded and the
    /// stage returns to `Pending`.
    async fn finish_cancelled(&self, session_id: &str, stage: Stage) {
        self.end_run(session_id, stage, StageState::Pending).await;
        tracing::info!(session_id, stage = %stage, "stage run cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recast_core::generation::{GenerationResponse, TracingNotifier};
    use recast_core::selection::SelectionEntry;
    use recast_core::session::SessionStatus;
    use recast_infrastructure::migration::storage_migrations;
    use recast_infrastructure::storage::MemoryKeyValueStore;
    use recast_infrastructure::{KvSessionRepository, VersionedStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted generation collaborator.
    struct ScriptedClient {
        replies: Mutex<Vec<Result<GenerationResponse>>>,
        calls: AtomicUsize,
        /// When true, wait for cancellation instead of replying.
        hang_until_cancelled: bool,
    }

    impl ScriptedClient {
        fn replying(replies: Vec<Result<GenerationResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
                hang_until_cancelled: false,
            }
        }

        fn hanging() -> Self {
            Self {
                replies: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                hang_until_cancelled: true,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn generate(
            &self,
            _request: GenerationRequest,
            cancel: CancellationToken,
        ) -> Result<GenerationResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_until_cancelled {
                cancel.cancelled().await;
                return Err(RecastError::Cancelled);
            }
            let mut replies = self.replies.lock().await;
            if replies.is_empty() {
                return Err(RecastError::transport("no scripted reply"));
            }
            replies.remove(0)
        }
    }

    async fn test_repository() -> Arc<dyn SessionRepository> {
        let store = Arc::new(MemoryKeyValueStore::new());
        let versioned = VersionedStore::open(store, &storage_migrations())
            .await
            .unwrap();
        Arc::new(KvSessionRepository::new(versioned).await.unwrap())
    }

    fn engine_with(
        client: Arc<ScriptedClient>,
        repository: Arc<dyn SessionRepository>,
    ) -> PipelineEngine {
        PipelineEngine::new(
            client,
            repository,
            Arc::new(PresetRegistry::new()),
            Arc::new(TracingNotifier),
            Observers::new(),
        )
    }

    fn document() -> Value {
        json!({"data": {"description": "A", "personality": "Curious"}})
    }

    async fn session_with_selection(repository: &Arc<dyn SessionRepository>) -> Session {
        let mut session = repository.create("char-1", "Aria").await.unwrap();
        session.stage_fields.set_selection(
            Stage::Score,
            [
                ("description".to_string(), SelectionEntry::Whole(true)),
                ("personality".to_string(), SelectionEntry::Whole(true)),
            ]
            .into_iter()
            .collect(),
        );
        session
            .stage_configs
            .entry(Stage::Score)
            .or_default()
            .custom_prompt = "Rate 1-10".to_string();
        session
    }

    #[tokio::test]
    async fn test_successful_run_records_result() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![Ok(GenerationResponse {
            text: "8".to_string(),
        })]));
        let engine = engine_with(client.clone(), repository.clone());
        let mut session = session_with_selection(&repository).await;

        let result = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.stage, Stage::Score);
        assert_eq!(result.output.as_deref(), Some("8"));
        assert_eq!(result.error, None);
        assert_eq!(session.iteration_count, 1);
        assert_eq!(session.history.len(), 1);
        assert_eq!(client.call_count(), 1);
        assert_eq!(
            engine.stage_state(&session.id, Stage::Score).await,
            StageState::Complete
        );

        // The run was persisted through the repository.
        let stored = repository.find_by_id(&session.id).await.unwrap().unwrap();
        assert_eq!(
            stored.stage_results[&Stage::Score].output.as_deref(),
            Some("8")
        );
    }

    #[tokio::test]
    async fn test_unparsable_schema_fails_before_the_request() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![Ok(GenerationResponse {
            text: "never used".to_string(),
        })]));
        let engine = engine_with(client.clone(), repository.clone());
        let mut session = session_with_selection(&repository).await;
        {
            let config = session.stage_configs.get_mut(&Stage::Score).unwrap();
            config.use_structured_output = true;
            config.custom_schema = "{not a schema".to_string();
        }

        let result = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap()
            .unwrap();

        assert!(result.output.is_none());
        assert!(result.error.is_some());
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.iteration_count, 0);
        // The collaborator was never reached.
        assert_eq!(client.call_count(), 0);
        assert_eq!(
            engine.stage_state(&session.id, Stage::Score).await,
            StageState::Error
        );
    }

    #[tokio::test]
    async fn test_structured_output_without_schema_fails_fast() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![]));
        let engine = engine_with(client.clone(), repository.clone());
        let mut session = session_with_selection(&repository).await;
        session
            .stage_configs
            .get_mut(&Stage::Score)
            .unwrap()
            .use_structured_output = true;

        let result = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap()
            .unwrap();
        assert!(result.error.as_deref().unwrap_or_default().contains("schema"));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded_as_stage_error() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![Err(
            RecastError::transport("connection reset"),
        )]));
        let engine = engine_with(client, repository.clone());
        let mut session = session_with_selection(&repository).await;

        let result = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap()
            .unwrap();
        assert!(result.error.as_deref().unwrap().contains("connection reset"));
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_no_trace() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::hanging());
        let engine = Arc::new(engine_with(client, repository.clone()));
        let mut session = session_with_selection(&repository).await;
        let history_before = session.history.clone();
        let results_before = session.stage_results.clone();

        let run_engine = engine.clone();
        let session_id = session.id.clone();
        let abort_handle = tokio::spawn(async move {
            // Wait for the run to register, then signal it.
            loop {
                if run_engine.abort(&session_id).await {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });

        let outcome = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap();
        abort_handle.await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(session.history, history_before);
        assert_eq!(session.stage_results, results_before);
        assert_eq!(session.iteration_count, 0);
        assert_eq!(
            engine.stage_state(&session.id, Stage::Score).await,
            StageState::Pending
        );
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_while_one_is_active() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::hanging());
        let engine = Arc::new(engine_with(client, repository.clone()));
        let session = session_with_selection(&repository).await;

        let run_engine = engine.clone();
        let mut run_session = session.clone();
        let doc = document();
        let first = tokio::spawn(async move {
            run_engine
                .run_stage(&mut run_session, Stage::Score, &doc)
                .await
        });

        // Wait until the first run holds the slot.
        while engine.stage_state(&session.id, Stage::Score).await != StageState::Running {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let mut second_session = session.clone();
        let err = engine
            .run_stage(&mut second_session, Stage::Rewrite, &document())
            .await
            .unwrap_err();
        assert!(matches!(err, RecastError::Execution(_)));

        // A different session is unaffected by this session's run slot.
        let mut other = repository.create("char-2", "Bren").await.unwrap();
        let other_client = Arc::new(ScriptedClient::replying(vec![Ok(GenerationResponse {
            text: "fine".to_string(),
        })]));
        let other_engine = engine_with(other_client, repository.clone());
        assert!(
            other_engine
                .run_stage(&mut other, Stage::Score, &document())
                .await
                .unwrap()
                .is_some()
        );

        engine.abort(&session.id).await;
        assert!(first.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stage_can_be_rerun_after_error() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![
            Err(RecastError::transport("flaky")),
            Ok(GenerationResponse {
                text: "9".to_string(),
            }),
        ]));
        let engine = engine_with(client, repository.clone());
        let mut session = session_with_selection(&repository).await;

        let first = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap()
            .unwrap();
        assert!(first.error.is_some());

        let second = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.output.as_deref(), Some("9"));
        assert_eq!(session.history.len(), 2);
        assert_eq!(
            session.stage_results[&Stage::Score].output.as_deref(),
            Some("9")
        );
    }

    #[tokio::test]
    async fn test_pipeline_continues_past_stage_failures() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![
            Err(RecastError::transport("boom")),
            Ok(GenerationResponse {
                text: "rewritten".to_string(),
            }),
        ]));
        let engine = engine_with(client, repository.clone());
        let mut session = session_with_selection(&repository).await;

        let results = engine
            .run_pipeline(&mut session, &[Stage::Score, Stage::Rewrite], &document())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].error.is_some());
        assert_eq!(results[1].output.as_deref(), Some("rewritten"));
    }

    #[tokio::test]
    async fn test_chained_stage_sees_prior_output() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![
            Ok(GenerationResponse {
                text: "scored-8".to_string(),
            }),
            Ok(GenerationResponse {
                text: "rewritten".to_string(),
            }),
        ]));
        let engine = engine_with(client, repository.clone());
        let mut session = session_with_selection(&repository).await;

        engine
            .run_pipeline(&mut session, &[Stage::Score, Stage::Rewrite], &document())
            .await
            .unwrap();

        // The rewrite run's recorded input carries the score output.
        let rewrite = &session.stage_results[&Stage::Rewrite];
        assert!(rewrite.input.contains("scored-8"));
    }

    #[tokio::test]
    async fn test_guidance_is_injected_and_recorded() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![Ok(GenerationResponse {
            text: "8".to_string(),
        })]));
        let engine = engine_with(client, repository.clone());
        let mut session = session_with_selection(&repository).await;
        session.user_guidance = "Keep the nautical theme.".to_string();

        let result = engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.guidance.as_deref(), Some("Keep the nautical theme."));
        assert!(result.input.contains("Keep the nautical theme."));
    }

    #[tokio::test]
    async fn test_completed_session_status_is_untouched_by_runs() {
        let repository = test_repository().await;
        let client = Arc::new(ScriptedClient::replying(vec![Ok(GenerationResponse {
            text: "8".to_string(),
        })]));
        let engine = engine_with(client, repository.clone());
        let mut session = session_with_selection(&repository).await;
        session.status = SessionStatus::Completed;

        engine
            .run_stage(&mut session, Stage::Score, &document())
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }
}
