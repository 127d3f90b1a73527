//! Engine configuration.
//!
//! Loaded from an optional `recast.toml`; every field has a default so a
//! missing or partial file is never an error.

use recast_core::session::{DEFAULT_MAX_HISTORY_ENTRIES, DEFAULT_MAX_SESSIONS_PER_CHARACTER};
use recast_core::{RecastError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecastConfig {
    /// Storage base directory; defaults to `~/.recast`.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Per-character session cap enforced on save.
    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_character: usize,
    /// Bound on each session's run history.
    #[serde(default = "default_max_history")]
    pub max_history_entries: usize,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS_PER_CHARACTER
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY_ENTRIES
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            max_sessions_per_character: default_max_sessions(),
            max_history_entries: default_max_history(),
        }
    }
}

impl RecastConfig {
    /// Loads configuration from a TOML file; a missing file yields the
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RecastError::Serialization {
            format: "TOML".to_string(),
            message: e.to_string(),
        })
    }

    /// The effective storage base directory.
    pub fn resolved_base_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.base_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".recast"))
            .ok_or_else(|| RecastError::io("failed to determine home directory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RecastConfig::load(dir.path().join("recast.toml")).unwrap();
        assert_eq!(config, RecastConfig::default());
        assert_eq!(config.max_sessions_per_character, 50);
        assert_eq!(config.max_history_entries, 100);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recast.toml");
        fs::write(&path, "max_sessions_per_character = 5\n").unwrap();

        let config = RecastConfig::load(&path).unwrap();
        assert_eq!(config.max_sessions_per_character, 5);
        assert_eq!(config.max_history_entries, 100);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recast.toml");
        fs::write(&path, "max_sessions_per_character = \"lots\"\n").unwrap();
        assert!(RecastConfig::load(&path).is_err());
    }

    #[test]
    fn test_explicit_base_dir_wins() {
        let config = RecastConfig {
            base_dir: Some(PathBuf::from("/tmp/recast-test")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_base_dir().unwrap(),
            PathBuf::from("/tmp/recast-test")
        );
    }
}
