// src/lock.rs

//! Advisory lock on an environment root
//!
//! The ledger only protects a single writer against partial writes. Two
//! processes driving the same root would interleave builds into one prefix,
//! so mutating commands hold `<root>/.kiln.lock` for their whole run.
//!
//! ```ignore
//! let _lock = EnvLock::try_acquire(&root)?;
//! // ... install / uninstall / clean ...
//! // released on drop
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the lock inside an environment root
pub const LOCK_FILE_NAME: &str = ".kiln.lock";

/// Exclusive lock held for the lifetime of the value
pub struct EnvLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl EnvLock {
    /// Try to lock `root` without blocking
    ///
    /// Fails with [`Error::Locked`] when another process holds the lock.
    pub fn try_acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE_NAME);
        let file = File::create(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired environment lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(Error::Locked(root.display().to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EnvLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();

        let lock = EnvLock::try_acquire(dir.path()).unwrap();
        assert!(lock.path().ends_with(LOCK_FILE_NAME));

        let second = EnvLock::try_acquire(dir.path());
        assert!(matches!(second, Err(Error::Locked(_))));

        drop(lock);
        assert!(EnvLock::try_acquire(dir.path()).is_ok());
    }
}
