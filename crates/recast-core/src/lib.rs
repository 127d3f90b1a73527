//! Recast domain core.
//!
//! Domain models and collaborator interfaces for the staged refinement
//! engine: the character field schema and extractor, the per-stage field
//! selection model, the session model and repository trait, presets, and
//! the generation/notification seams. Persistence and execution live in
//! `recast-infrastructure` and `recast-application`.

pub mod character;
pub mod error;
pub mod generation;
pub mod preset;
pub mod selection;
pub mod session;
pub mod stage;

// Re-export common error type
pub use error::{RecastError, Result};
