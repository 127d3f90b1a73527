//! Durable key-value backends.
//!
//! The engine is agnostic about where blobs live; everything above this
//! layer goes through [`KeyValueStore`]. The file-backed implementation
//! gives atomic, locked writes (tmp file + fsync + rename), the in-memory
//! one backs tests and the degraded no-persistence mode.

use async_trait::async_trait;
use fs2::FileExt;
use recast_core::{RecastError, Result};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Abstract durable key-value store.
///
/// Keys are restricted to `[A-Za-z0-9:_.-]`; values are opaque strings
/// (the layers above serialize JSON into them).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value; `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes a key; absent keys are a no-op.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All present keys, in unspecified order.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory store for tests and ephemeral (degraded) operation.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().expect("kv lock").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("kv lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().expect("kv lock").remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().expect("kv lock").keys().cloned().collect())
    }
}

/// File-backed store: one file per key under a base directory.
///
/// Writes are atomic (tmp file + fsync + atomic rename) and guarded by an
/// advisory `fs2` lock, so the store stays consistent under concurrent
/// access from multiple processes.
pub struct FileKeyValueStore {
    base_dir: PathBuf,
}

impl FileKeyValueStore {
    /// Creates the store, creating the base directory if needed.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Store at the default location (`~/.recast`).
    pub fn default_location() -> Result<Self> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| RecastError::io("failed to determine home directory"))?;
        Self::new(home_dir.join(".recast"))
    }

    /// Key → file name. `:` is not portable in file names, so it maps to
    /// `__`; ids never contain double underscores.
    fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key.replace(':', "__")))
    }

    fn key_from_file(stem: &str) -> String {
        stem.replace("__", ":")
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.lock", key.replace(':', "__")))
    }

    /// Acquires the advisory write lock for a key.
    fn acquire_lock(&self, key: &str) -> Result<FileLock> {
        FileLock::acquire(self.lock_path(key))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(content))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.file_path(key);
        let _lock = self.acquire_lock(key)?;

        let tmp_path = self.base_dir.join(format!(
            ".{}.tmp",
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        ));
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(value.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.file_path(key);
        let _lock = self.acquire_lock(key)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem.starts_with('.') {
                    continue;
                }
                keys.push(Self::key_from_file(stem));
            }
        }
        Ok(keys)
    }
}

/// Advisory lock guard; released (and the lock file cleaned up) on drop.
struct FileLock {
    #[allow(dead_code)]
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    fn acquire(lock_path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        file.lock_exclusive()
            .map_err(|e| RecastError::io(format!("failed to acquire store lock: {e}")))?;

        Ok(FileLock { file, lock_path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}
