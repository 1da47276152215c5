//! Advisory run lock
//!
//! Held for the whole run so two overlapping invocations never interleave reads and
//! writes of the same cache entries. The OS releases the lock when the file handle
//! is closed, including on process termination, so a crashed run never leaves a
//! stale lock behind.

use crate::error::{Result, SyncError};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lock file name inside the cache folder
pub const LOCK_FILE_NAME: &str = "opus-sync.lock";

/// Exclusive lock on `<cache_dir>/opus-sync.lock`, released on drop
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock without waiting
    ///
    /// # Errors
    /// `SyncError::AlreadyRunning` if another process holds it, `SyncError::Io` otherwise.
    pub fn acquire(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(LOCK_FILE_NAME);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(SyncError::AlreadyRunning(path.display().to_string()));
            }
            Err(TryLockError::Error(e)) => return Err(SyncError::Io(e)),
        }

        // Informational only; the OS lock is what counts
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!(path = %path.display(), "Run lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        } else {
            tracing::debug!(path = %self.path.display(), "Run lock released");
        }
    }
}
