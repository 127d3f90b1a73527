//! Session use case orchestration.
//!
//! `SessionService` coordinates the session repository with change
//! notification: selection edits, guidance, lifecycle transitions and
//! active-session tracking all commit through here, and every committed
//! mutation fires a [`ChangeEvent`].

use crate::observers::Observers;
use recast_core::selection::FieldSelection;
use recast_core::session::{ChangeEvent, Session, SessionRepository, SessionStatus};
use recast_core::stage::Stage;
use recast_core::{RecastError, Result};
use std::sync::Arc;

/// Use case layer over the session repository.
pub struct SessionService {
    repository: Arc<dyn SessionRepository>,
    observers: Observers,
}

impl SessionService {
    pub fn new(repository: Arc<dyn SessionRepository>, observers: Observers) -> Self {
        Self {
            repository,
            observers,
        }
    }

    /// Returns the character's active session, creating one on first use.
    ///
    /// A session is created when no active session exists for the
    /// character — this is the "first field selection creates the
    /// session" entry point. The new session becomes the active one.
    pub async fn ensure_session(
        &self,
        character_id: &str,
        character_name: &str,
    ) -> Result<Session> {
        if let Some(active_id) = self.repository.get_active_session_id().await? {
            if let Some(session) = self.repository.find_by_id(&active_id).await? {
                if session.character_id == character_id && session.status.is_active() {
                    return Ok(session);
                }
            }
        }

        let session = self.repository.create(character_id, character_name).await?;
        self.repository
            .set_active_session_id(Some(&session.id))
            .await?;
        tracing::info!(
            session_id = %session.id,
            character_id,
            "started new refinement session"
        );
        Ok(session)
    }

    /// Makes an existing session the active one.
    pub async fn switch_session(&self, session_id: &str) -> Result<Session> {
        let session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| RecastError::not_found("session", session_id))?;
        self.repository
            .set_active_session_id(Some(session_id))
            .await?;
        Ok(session)
    }

    /// Replaces a stage's field selection and persists.
    ///
    /// While the selection is linked this propagates to every stage.
    pub async fn select_fields(
        &self,
        session: &mut Session,
        stage: Stage,
        selection: FieldSelection,
    ) -> Result<()> {
        session.stage_fields.set_selection(stage, selection);
        session.touch();
        self.repository.save(session).await?;
        self.observers.notify(&ChangeEvent::SelectionChanged {
            session_id: session.id.clone(),
            stage,
        });
        self.observers.notify(&ChangeEvent::SessionSaved {
            session_id: session.id.clone(),
        });
        Ok(())
    }

    /// Toggles selection linking and persists.
    pub async fn set_linked(
        &self,
        session: &mut Session,
        linked: bool,
        active_stage: Stage,
    ) -> Result<()> {
        session.stage_fields.set_linked(linked, active_stage);
        session.touch();
        self.repository.save(session).await?;
        self.observers.notify(&ChangeEvent::SelectionChanged {
            session_id: session.id.clone(),
            stage: active_stage,
        });
        self.observers.notify(&ChangeEvent::SessionSaved {
            session_id: session.id.clone(),
        });
        Ok(())
    }

    /// Updates the running guidance text and persists.
    pub async fn set_guidance(&self, session: &mut Session, guidance: String) -> Result<()> {
        session.user_guidance = guidance;
        session.touch();
        self.save(session).await
    }

    /// Persists the session and fires the save notification.
    pub async fn save(&self, session: &Session) -> Result<()> {
        self.repository.save(session).await?;
        self.observers.notify(&ChangeEvent::SessionSaved {
            session_id: session.id.clone(),
        });
        Ok(())
    }

    /// Marks the session completed and persists.
    pub async fn complete(&self, session: &mut Session) -> Result<()> {
        session.status = SessionStatus::Completed;
        session.touch();
        self.save(session).await
    }

    /// Marks the session abandoned and persists.
    pub async fn abandon(&self, session: &mut Session) -> Result<()> {
        session.status = SessionStatus::Abandoned;
        session.touch();
        self.save(session).await
    }

    /// Removes a session outright. Idempotent.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.repository.delete(session_id).await?;
        self.observers.notify(&ChangeEvent::SessionDeleted {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// The character's sessions, most recently updated first.
    pub async fn list_for_character(&self, character_id: &str) -> Result<Vec<Session>> {
        self.repository.list_for_character(character_id).await
    }
}
