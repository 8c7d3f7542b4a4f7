//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                 # advisory lock, one process at a time
//! ├─ journal.log          # committed transactions
//! └─ journal.log.compact  # compaction output before it is renamed into place
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const COMPACT_FILE: &str = "journal.log.compact";

/// An opened store directory holding the exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (or creates) a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidFormat`] if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    /// - [`CoreError::StoreLocked`] if another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the live journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Path compaction writes to before renaming.
    #[must_use]
    pub fn compact_path(&self) -> PathBuf {
        self.path.join(COMPACT_FILE)
    }

    /// Removes a compaction file left behind by an interrupted compaction.
    pub fn remove_stale_compaction(&self) -> CoreResult<()> {
        let path = self.compact_path();
        if path.exists() {
            tracing::warn!(path = %path.display(), "removing stale compaction file");
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Moves the compaction file over the live journal.
    pub fn install_compaction(&self) -> CoreResult<()> {
        fs::rename(self.compact_path(), self.journal_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Journal path inside a store directory, for tools that read a store
/// without opening it.
#[must_use]
pub fn journal_path_in(path: &Path) -> PathBuf {
    path.join(JOURNAL_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_directory_and_lock() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store");
        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(dir.journal_path(), path.join("journal.log"));
    }

    #[test]
    fn missing_directory_without_create() {
        let tmp = tempdir().unwrap();
        let err = StoreDir::open(&tmp.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempdir().unwrap();
        let _first = StoreDir::open(tmp.path(), true).unwrap();
        assert!(matches!(
            StoreDir::open(tmp.path(), true),
            Err(CoreError::StoreLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let tmp = tempdir().unwrap();
        drop(StoreDir::open(tmp.path(), true).unwrap());
        StoreDir::open(tmp.path(), true).unwrap();
    }
}
