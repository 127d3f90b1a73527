//! Core traits for the migration framework.
//!
//! This module defines the fundamental abstractions for implementing
//! schema migrations in a type-safe and composable way.

use anyhow::Result;
use semver::Version;
use serde_json::Value;

/// Base trait for all migrations.
///
/// Provides version information and metadata about a migration step.
pub trait Migration: Send + Sync {
    /// Returns the source version this migration starts from.
    fn from_version(&self) -> Version;

    /// Returns the target version this migration produces.
    fn to_version(&self) -> Version;

    /// Checks if this migration can be applied to the given version.
    fn can_migrate(&self, version: &Version) -> bool {
        version == &self.from_version()
    }

    /// Returns a human-readable description of this migration.
    ///
    /// Used for logging and debugging purposes.
    fn description(&self) -> &str;
}

/// A migration step over a raw JSON snapshot.
///
/// Steps work on `serde_json::Value` so one linear chain can carry any
/// persisted entity shape; each step deserializes into its own typed view
/// internally. Steps must be pure transforms of their input — idempotency
/// of the whole chain comes from the stamped version, not per-step flags.
pub trait ValueMigration: Migration + std::fmt::Debug {
    /// Executes the migration, transforming the snapshot from the source
    /// to the target shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot does not match the source shape.
    fn migrate(&self, value: Value) -> Result<Value>;
}
