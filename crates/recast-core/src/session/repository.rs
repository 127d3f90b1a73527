//! Session repository trait.
//!
//! Defines the interface for session persistence operations.

use super::model::Session;
use crate::error::Result;
use async_trait::async_trait;

/// An abstract repository for managing session persistence.
///
/// This trait defines the contract for persisting and retrieving sessions,
/// decoupling the engine's core logic from the specific storage mechanism.
///
/// # Implementation Notes
///
/// Implementations own the session records and the character→session index
/// exclusively, and must keep the two consistent: every indexed id has a
/// backing record and every record is reachable from the index. Deviations
/// found on load are self-healed, not surfaced.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Creates and persists a fresh session for a character.
    ///
    /// The new session starts with an empty history, a linked field
    /// selection and `Active` status, and its id is appended to the
    /// character's index entry.
    async fn create(&self, character_id: &str, character_name: &str) -> Result<Session>;

    /// Finds a session by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: Session found (migrated forward if the
    ///   stored record used an older shape)
    /// - `Ok(None)`: Session not found
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Lists a character's sessions, most recently updated first.
    async fn list_for_character(&self, character_id: &str) -> Result<Vec<Session>>;

    /// Saves a session to storage.
    ///
    /// Upserts by id and bumps `updated_at`. Enforces the per-character
    /// session cap by evicting the oldest completed/abandoned session
    /// first, falling back to the oldest active one — never the session
    /// being saved.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Deletes a session from both storage and the index.
    ///
    /// Deletion is idempotent: deleting an absent session is a no-op.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Gets the ID of the currently active session, if any.
    async fn get_active_session_id(&self) -> Result<Option<String>>;

    /// Sets or clears the ID of the currently active session.
    async fn set_active_session_id(&self, session_id: Option<&str>) -> Result<()>;
}
