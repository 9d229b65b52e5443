use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs4::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt document at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode document for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to acquire lock {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Exclusive advisory lock on a lock file, released when dropped.
///
/// The lock is an OS-level flock, so it excludes other processes as well as
/// other threads of this one. It is not reentrant: acquiring a lock file
/// that the current thread already holds deadlocks.
pub struct LockGuard {
    _file: File,
}

/// Blocks until the exclusive lock on `lock_path` is acquired.
pub fn lock_exclusive(lock_path: &Path) -> Result<LockGuard, StorageError> {
    if let Some(dir) = lock_path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_error(lock_path, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(lock_path)
        .map_err(|e| io_error(lock_path, e))?;
    file.lock_exclusive().map_err(|e| StorageError::Lock {
        path: lock_path.display().to_string(),
        source: e,
    })?;
    Ok(LockGuard { _file: file })
}

/// Runs `f` while holding the exclusive lock on `lock_path`.
///
/// The lock is released on every exit path of `f`, including panics, since
/// the guard unlocks on drop.
pub fn with_lock<R>(lock_path: &Path, f: impl FnOnce() -> R) -> Result<R, StorageError> {
    let _guard = lock_exclusive(lock_path)?;
    Ok(f())
}

/// Reads and decodes a JSON document.
///
/// A missing file is `Ok(None)`; a file that exists but does not decode is
/// a `Corrupt` error. Callers decide which of the two to repair with a
/// default document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            path: path.display().to_string(),
            source: e,
        })
}

/// Durably replaces the document at `path` with the JSON encoding of `value`.
///
/// The payload is written to a temporary file in the same directory, synced
/// to stable storage, then renamed over the target, so a concurrent or
/// crashing reader observes either the old or the new content, never a
/// partial write. The temporary file is removed if anything fails before
/// the rename.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| io_error(path, e))?;

    let mut payload = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Encode {
        path: path.display().to_string(),
        source: e,
    })?;
    payload.push(b'\n');

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(path, e))?;
    tmp.write_all(&payload).map_err(|e| io_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}
