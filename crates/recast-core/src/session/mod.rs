//! Session domain module.
//!
//! This module contains all session-related domain models, the repository
//! interface and change-notification hooks.
//!
//! # Module Structure
//!
//! - `model`: Core session domain model (`Session`, `StageConfig`, `StageResult`)
//! - `repository`: Repository trait for session persistence
//! - `event`: Change-notification events and the observer hook

mod event;
mod model;
mod repository;

pub use event::{ChangeEvent, ChangeObserver};
pub use model::{
    DEFAULT_MAX_HISTORY_ENTRIES, DEFAULT_MAX_SESSIONS_PER_CHARACTER, Session, SessionStatus,
    StageConfig, StageResult, now_rfc3339,
};
pub use repository::SessionRepository;
