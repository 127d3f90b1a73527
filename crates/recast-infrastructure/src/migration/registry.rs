//! Migration registry for managing linear migration chains.
//!
//! This module implements a simple, linear migration chain where each
//! version must migrate through all intermediate versions. This approach
//! prioritizes safety and debuggability over performance.

use super::traits::ValueMigration;
use anyhow::{Context, Result};
use semver::Version;
use serde_json::Value;
use std::sync::Arc;

/// Registry for managing a linear chain of migrations.
///
/// Migrations are stored in order and must form a continuous chain:
/// V1.0.0 → V1.1.0 → V2.0.0 → ...
///
/// When adding migrations via `register()`, the registry validates that
/// each new migration's `from_version()` matches the previous migration's
/// `to_version()`.
#[derive(Debug)]
pub struct MigrationRegistry {
    /// Migrations in order, forming a linear chain.
    migrations: Vec<Arc<dyn ValueMigration>>,
    /// The latest version this registry can migrate to.
    latest_version: Version,
}

impl MigrationRegistry {
    /// Creates a new migration registry with the specified latest version.
    pub fn new(latest_version: Version) -> Self {
        Self {
            migrations: Vec::new(),
            latest_version,
        }
    }

    /// The latest version this registry migrates to.
    pub fn latest_version(&self) -> &Version {
        &self.latest_version
    }

    /// Registers a single migration, validating chain continuity.
    ///
    /// # Panics
    ///
    /// Panics if the migration doesn't connect to the existing chain, or
    /// if its target version exceeds the registry's latest version. These
    /// are programming errors caught at startup, not runtime conditions.
    pub fn register(&mut self, migration: Arc<dyn ValueMigration>) {
        if let Some(last) = self.migrations.last() {
            assert_eq!(
                last.to_version(),
                migration.from_version(),
                "Migration chain broken: expected migration from {} (previous to_version), but got migration from {}. \
                 Description: '{}' (previous) -> '{}' (current)",
                last.to_version(),
                migration.from_version(),
                last.description(),
                migration.description()
            );
        }

        if migration.to_version() > self.latest_version {
            panic!(
                "Migration target version {} exceeds registry's latest version {}",
                migration.to_version(),
                self.latest_version
            );
        }

        self.migrations.push(migration);
    }

    /// Registers multiple migrations at once, in order.
    pub fn register_all(&mut self, migrations: Vec<Arc<dyn ValueMigration>>) {
        for migration in migrations {
            self.register(migration);
        }
    }

    /// Returns true if no migrations are registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Returns the number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Finds the index of the first migration that starts from the given version.
    fn find_start_index(&self, from_version: &Version) -> Option<usize> {
        self.migrations
            .iter()
            .position(|m| &m.from_version() == from_version)
    }

    /// Migrates a snapshot from a specific version to the latest version,
    /// walking every intermediate step in sequence.
    ///
    /// # Errors
    ///
    /// - The snapshot's version is newer than the latest supported one.
    /// - No migration path starts at the snapshot's version.
    /// - Any step in the chain fails.
    pub fn migrate_to_latest(&self, mut value: Value, current_version: &Version) -> Result<Value> {
        if current_version == &self.latest_version {
            tracing::debug!(
                "Data is already at the latest version ({}), no migration needed",
                current_version
            );
            return Ok(value);
        }

        if current_version > &self.latest_version {
            anyhow::bail!(
                "Data version ({}) is newer than the latest supported version ({})",
                current_version,
                self.latest_version
            );
        }

        let start_idx = self.find_start_index(current_version).ok_or_else(|| {
            let available: Vec<String> = self
                .migrations
                .iter()
                .map(|m| format!("{} -> {}", m.from_version(), m.to_version()))
                .collect();
            anyhow::anyhow!(
                "No migration found starting from version {}. Available migrations: [{}]",
                current_version,
                available.join(", ")
            )
        })?;

        tracing::info!(
            "Starting migration from {} to {} ({} steps)",
            current_version,
            self.latest_version,
            self.migrations.len() - start_idx
        );

        for (i, migration) in self.migrations[start_idx..].iter().enumerate() {
            tracing::info!(
                "Migration step {}/{}: {} -> {} ({})",
                i + 1,
                self.migrations.len() - start_idx,
                migration.from_version(),
                migration.to_version(),
                migration.description()
            );

            value = migration.migrate(value).with_context(|| {
                format!(
                    "Migration failed at step {}: {} -> {}",
                    i + 1,
                    migration.from_version(),
                    migration.to_version()
                )
            })?;
        }

        tracing::info!(
            "Migration completed successfully: {} -> {}",
            current_version,
            self.latest_version
        );

        Ok(value)
    }
}
