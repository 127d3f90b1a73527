//! Error types for the Recast engine.

use serde::Serialize;
use thiserror::Error;

/// A shared error type for the entire Recast engine.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait.
#[derive(Error, Debug, Clone, Serialize)]
pub enum RecastError {
    /// Bad schema or prompt, caught before any generation request is sent
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generation collaborator failure (network-class)
    #[error("Transport error: {0}")]
    Transport(String),

    /// User-initiated abort; not a failure
    #[error("Operation cancelled")]
    Cancelled,

    /// Persisted data is newer than this build supports (downgrade scenario)
    #[error("Incompatible storage version: found {found}, supported up to {supported}")]
    StorageIncompatibleVersion { found: String, supported: String },

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Stage execution error (e.g. a run is already in flight)
    #[error("Execution error: {0}")]
    Execution(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecastError {
    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Migration error
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration(message.into())
    }

    /// Creates an Execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a Validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a Transport error
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this is a Cancelled error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error indicates an incompatible persisted version
    pub fn is_incompatible_version(&self) -> bool {
        matches!(self, Self::StorageIncompatibleVersion { .. })
    }

    /// Check if this error should be captured into a StageResult rather
    /// than propagated: validation and transport failures are recorded
    /// per-stage, everything else bubbles up.
    pub fn is_stage_failure(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Transport(_))
    }
}

impl From<std::io::Error> for RecastError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for RecastError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from String (for error messages)
impl From<String> for RecastError {
    fn from(err: String) -> Self {
        Self::Internal(err)
    }
}

/// A type alias for `Result<T, RecastError>`.
pub type Result<T> = std::result::Result<T, RecastError>;
