//! Version-control backend adapter.
//!
//! The cache never talks to a VCS directly; everything goes through
//! [`VcsBackend`]. Query methods are called from the store and the label
//! worker, mutating methods only from the filesystem interceptor.
//!
//! The cheap local checks (`repository_root`, `is_metadata`, `is_ignored`) must
//! not call back into the status cache: the store invokes them while holding a
//! directory's refresh lock.

use crate::core::error::BackendError;
use crate::core::status::StatusRecord;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Display metadata for a versioned file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RevisionInfo {
    pub revision: Option<String>,
    pub last_changed_revision: Option<String>,
    pub last_author: Option<String>,
    pub last_changed: Option<DateTime<Utc>>,
    /// Branch or copy name the file is checked out from
    pub sticky: Option<String>,
}

pub trait VcsBackend: Send + Sync {
    /// Root of the working copy managing `path`, `None` when unmanaged
    fn repository_root(&self, path: &Path) -> Option<PathBuf>;

    /// True for the backend's own administrative files and directories
    fn is_metadata(&self, path: &Path) -> bool;

    fn is_ignored(&self, path: &Path) -> bool;

    fn single_status(&self, path: &Path) -> BackendResult<Option<StatusRecord>>;

    /// Records for every interesting path beneath `dir`
    fn recursive_status(&self, dir: &Path) -> BackendResult<Vec<StatusRecord>>;

    fn remove(&self, path: &Path, recursive: bool) -> BackendResult<()>;

    fn move_path(&self, from: &Path, to: &Path, force: bool) -> BackendResult<()>;

    fn copy(&self, from: &Path, to: &Path) -> BackendResult<()>;

    /// Schedule a single file or directory for addition
    fn add(&self, path: &Path) -> BackendResult<()>;

    fn add_directory(&self, dir: &Path) -> BackendResult<()> {
        self.add(dir)
    }

    /// Undo scheduled additions/removals
    fn revert(&self, path: &Path, recursive: bool) -> BackendResult<()>;

    fn lock(&self, path: &Path) -> BackendResult<()>;

    fn unlock(&self, path: &Path) -> BackendResult<()>;

    fn info(&self, path: &Path) -> BackendResult<RevisionInfo>;

    fn mime_type(&self, path: &Path) -> BackendResult<Option<String>>;
}
