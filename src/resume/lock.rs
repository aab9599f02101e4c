//! Per-collection run lock
//!
//! Two processes running the same collection would interleave cursor writes.
//! The lock is an advisory fd-lock on `<state_dir>/<collection>.run.lock`,
//! held until the [`CollectionLock`] is dropped.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use super::store::ResumeError;

/// Exclusive run lock for one collection
pub struct CollectionLock {
    // Closing the file releases the lock.
    _lock: RwLock<File>,
    path: PathBuf,
}

impl CollectionLock {
    /// Path of the lock file for `collection` under `state_dir`
    pub fn path_for(state_dir: &Path, collection: &str) -> PathBuf {
        state_dir.join(format!("{collection}.run.lock"))
    }

    /// Acquire the lock, blocking until it is free.
    pub fn acquire(state_dir: &Path, collection: &str) -> Result<Self, ResumeError> {
        let (path, mut lock) = open(state_dir, collection)?;
        {
            let guard = lock
                .write()
                .map_err(|e| ResumeError::LockError(format!("Failed to acquire lock: {e}")))?;
            std::mem::forget(guard);
        }
        Ok(Self { _lock: lock, path })
    }

    /// Acquire the lock or fail at once if another process holds it.
    pub fn try_acquire(state_dir: &Path, collection: &str) -> Result<Self, ResumeError> {
        let (path, mut lock) = open(state_dir, collection)?;
        {
            let guard = lock
                .try_write()
                .map_err(|e| ResumeError::LockError(format!("Failed to acquire lock: {e}")))?;
            std::mem::forget(guard);
        }
        Ok(Self { _lock: lock, path })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open(state_dir: &Path, collection: &str) -> Result<(PathBuf, RwLock<File>), ResumeError> {
    std::fs::create_dir_all(state_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;
    let path = CollectionLock::path_for(state_dir, collection);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;
    Ok((path, RwLock::new(file)))
}
