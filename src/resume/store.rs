//! Durable key/value checkpoint storage
//!
//! [`FileCheckpointStore`] keeps one JSON file per key, named after the
//! SHA-256 of the key, so collections never share a file. Writes go to a temp
//! file in the same directory which is synced and renamed over the target;
//! a crash leaves either the old or the new value, never a torn one.

use fd_lock::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::checkpoint::CheckpointRecord;

/// Largest checkpoint file we are willing to read
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Checkpoint storage errors
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Checkpoint file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// File content belongs to a different key than its name says
    #[error("checkpoint file {file} holds key {found}")]
    KeyMismatch {
        /// File name
        file: String,
        /// Key found inside
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}

/// Key/value store for cursors and watermarks
///
/// `set` replaces the previous value atomically. Setting an empty value is the
/// same as `clear`.
pub trait CheckpointStore: Send + Sync {
    /// Stored value, `None` when absent
    fn get(&self, key: &str) -> Result<Option<String>, ResumeError>;

    /// Replace the value of `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), ResumeError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn clear(&self, key: &str) -> Result<(), ResumeError>;
}

/// `sha256(key)` in hex plus `.json`
pub fn checkpoint_file_name(key: &str) -> String {
    format!("{:x}.json", Sha256::digest(key.as_bytes()))
}

/// One file per key under a state directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store rooted at `dir`, created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// State directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(checkpoint_file_name(key))
    }

    /// Every checkpoint file in the directory, sorted by file name.
    ///
    /// Each entry is the file path and either the parsed record or the
    /// reason it is unusable.
    pub fn list_records(&self) -> Result<Vec<(PathBuf, Result<CheckpointRecord, ResumeError>)>, ResumeError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let record = read_record(&path).and_then(|record| {
                    let file = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default()
                        .to_string();
                    if checkpoint_file_name(record.key()) != file {
                        return Err(ResumeError::KeyMismatch {
                            file,
                            found: record.key().to_string(),
                        });
                    }
                    Ok(record)
                });
                (path, record)
            })
            .collect())
    }

    fn open_lock_file(&self, path: &Path) -> Result<RwLock<File>, ResumeError> {
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;
        Ok(RwLock::new(file))
    }

    fn ensure_dir(&self) -> Result<(), ResumeError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ResumeError::IoError(e.to_string()))
    }
}

fn read_record(path: &Path) -> Result<CheckpointRecord, ResumeError> {
    let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_CHECKPOINT_FILE_SIZE,
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    let record: CheckpointRecord = serde_json::from_str(&contents).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to deserialize checkpoint");
        ResumeError::DeserializationError(e.to_string())
    })?;
    record.validate_schema_version()?;
    Ok(record)
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<String>, ResumeError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let lock = self.open_lock_file(&path)?;
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        // Cleared between the existence check and the lock.
        if !path.exists() {
            return Ok(None);
        }
        let record = read_record(&path)?;
        if record.key() != key {
            return Err(ResumeError::KeyMismatch {
                file: checkpoint_file_name(key),
                found: record.key().to_string(),
            });
        }
        debug!(key, "Loaded checkpoint");
        Ok(Some(record.value().to_string()).filter(|v| !v.is_empty()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ResumeError> {
        if value.is_empty() {
            return self.clear(key);
        }
        self.ensure_dir()?;
        let path = self.path_for(key);

        let json = serde_json::to_string_pretty(&CheckpointRecord::new(key, value))
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let mut lock = self.open_lock_file(&path)?;
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Make the rename itself durable.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(key, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), ResumeError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(());
        }

        let mut lock = self.open_lock_file(&path)?;
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        }
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        debug!(key, "Checkpoint cleared");
        Ok(())
    }
}

/// Process-local store, used when resume is off and in tests
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `pairs`
    pub fn with_values<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Copy of all entries
    pub fn snapshot(&self) -> Result<HashMap<String, String>, ResumeError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, ResumeError> {
        self.values
            .lock()
            .map_err(|e| ResumeError::LockError(e.to_string()))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<String>, ResumeError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ResumeError> {
        let mut values = self.lock()?;
        if value.is_empty() {
            values.remove(key);
        } else {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), ResumeError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
