//! Per-folder lock files preventing two syncs of the same folder.

use std::fmt::Write;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Lock file name for `folder`: the hex SHA-256 of the folder path.
#[must_use]
pub fn lock_file_name(folder: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(folder.as_bytes());
    let hash = hasher.finalize();

    let mut name = String::with_capacity(hash.len() * 2 + 5);
    for byte in hash {
        let _ = write!(name, "{byte:02x}");
    }
    name.push_str(".lock");
    name
}

/// Full lock path for `folder` inside `dir`.
#[must_use]
pub fn lock_path(dir: &Path, folder: &str) -> PathBuf {
    dir.join(lock_file_name(folder))
}

/// Held lock; the file is removed when dropped.
#[derive(Debug)]
pub struct FolderLock {
    path: PathBuf,
}

impl FolderLock {
    /// Creates the lock file for `folder`.
    ///
    /// Returns `Ok(None)` when another process already holds the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created for any other
    /// reason.
    pub fn acquire(dir: &Path, folder: &str) -> Result<Option<Self>> {
        let path = lock_path(dir, folder);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                log::debug!("Acquired lock {}", path.display());
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::info!("{folder} is already being synced ({})", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FolderLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock {}: {e}", self.path.display());
        }
    }
}
