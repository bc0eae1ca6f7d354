//! Hooks around create, delete, move and copy.
//!
//! The surrounding filesystem layer calls `before_*` to ask whether the
//! operation should be handled here, `do_*` instead of the plain filesystem
//! operation, and `after_*` once the operation is over. The after phases only
//! reconcile the cache; they never fail.
//!
//! Any `do_*` failure is reported as [`StatusCacheError::Operation`] after
//! every touched path has been queued for refresh, so the cache heals itself
//! on the next read.

use crate::core::backend::{BackendResult, VcsBackend};
use crate::core::config::CacheConfig;
use crate::core::error::{BackendError, Result, StatusCacheError};
use crate::core::file_ref::FileRef;
use crate::core::fs_ops;
use crate::core::scheduler::RefreshScheduler;
use crate::core::status::{FileStatus, StatusMask};
use crate::core::store::StatusStore;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    pub lock_retry_attempts: u32,
    pub lock_retry_backoff: Duration,
    pub auto_repair_external_deletes: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for InterceptorConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            lock_retry_attempts: config.lock_retry_attempts.max(1),
            lock_retry_backoff: config.lock_retry_backoff(),
            auto_repair_external_deletes: config.auto_repair_external_deletes,
        }
    }
}

/// How a move or copy is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// One backend command, source and destination share a working copy
    Backend,
    /// Source only scheduled for addition: undo that, transfer on disk, add again
    RevertAndTransfer,
    /// Different working copies: transfer file by file and add the destination tree
    CrossRepository,
    /// Source is not versioned: a plain filesystem operation
    Filesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Move,
    Copy,
}

impl Transfer {
    fn name(self) -> &'static str {
        match self {
            Transfer::Move => "move",
            Transfer::Copy => "copy",
        }
    }
}

pub struct FilesystemInterceptor {
    store: Arc<StatusStore>,
    scheduler: Arc<RefreshScheduler>,
    backend: Arc<dyn VcsBackend>,
    config: InterceptorConfig,
    internally_deleted: Mutex<HashSet<FileRef>>,
    /// Ancestors re-instated by `do_create`, keyed by the created file
    reinstated: Mutex<HashMap<FileRef, Vec<FileRef>>>,
    /// Paths touched by a manual transfer, keyed by destination
    touched: Mutex<HashMap<FileRef, Vec<FileRef>>>,
}

impl FilesystemInterceptor {
    pub fn new(
        store: Arc<StatusStore>,
        scheduler: Arc<RefreshScheduler>,
        config: InterceptorConfig,
    ) -> Self {
        let backend = Arc::clone(store.backend());
        Self {
            store,
            scheduler,
            backend,
            config,
            internally_deleted: Mutex::new(HashSet::new()),
            reinstated: Mutex::new(HashMap::new()),
            touched: Mutex::new(HashMap::new()),
        }
    }

    // --- create ------------------------------------------------------------

    /// True when `file` or one of its ancestors is scheduled for deletion
    pub fn before_create(&self, file: &FileRef) -> bool {
        !self.scheduled_deletions(file).is_empty()
    }

    /// Undo pending deletions above `file`, then create it
    pub fn do_create(&self, file: &FileRef, is_directory: bool) -> Result<()> {
        let deleted = self.scheduled_deletions(file);
        for path in &deleted {
            log::debug!("do_create: reverting scheduled deletion of {path}");
            if let Err(e) = self.with_lock_retry(|| self.backend.revert(path.path(), false)) {
                self.invalidate(&deleted, file);
                return Err(StatusCacheError::operation("revert", path.path(), e));
            }
        }
        let created = if is_directory {
            fs::create_dir_all(file.path())
        } else {
            create_file(file)
        };
        if let Err(e) = created {
            self.invalidate(&deleted, file);
            return Err(StatusCacheError::operation("create", file.path(), e.into()));
        }
        self.reinstated.lock().insert(file.clone(), deleted);
        Ok(())
    }

    pub fn after_create(&self, file: &FileRef) {
        let reinstated = self.reinstated.lock().remove(file).unwrap_or_default();
        // outermost first so every child sees its parent's new status
        for path in &reinstated {
            self.store.refresh(path, None);
        }
        self.store.refresh(file, None);
        self.scheduler
            .refresh_async(std::slice::from_ref(file), file.is_dir());
    }

    // --- delete --------------------------------------------------------------

    pub fn before_delete(&self, file: &FileRef) -> bool {
        !self.backend.is_metadata(file.path()) && self.backend.repository_root(file.path()).is_some()
    }

    /// Remove through the backend, falling back to a plain delete for
    /// unversioned files
    pub fn do_delete(&self, file: &FileRef) -> Result<()> {
        self.internally_deleted.lock().insert(file.clone());

        match self.with_lock_retry(|| self.backend.remove(file.path(), true)) {
            Ok(()) => {}
            Err(e) if e.is_unversioned() => {
                log::debug!("do_delete: {file} is not versioned, deleting plainly");
            }
            Err(e) => return Err(self.delete_failed(file, e)),
        }

        fs_ops::remove_path(file.path()).map_err(|e| self.delete_failed(file, e.into()))
    }

    /// The after phase will not run: forget the pending delete and heal the cache
    fn delete_failed(&self, file: &FileRef, cause: BackendError) -> StatusCacheError {
        log::warn!("Delete of {file} failed: {cause}");
        self.internally_deleted.lock().remove(file);
        let mut touched = vec![file.clone()];
        touched.extend(self.store.list_files(std::slice::from_ref(file), StatusMask::ALL));
        self.invalidate(&touched, file);
        StatusCacheError::operation("remove", file.path(), cause)
    }

    pub fn after_delete(&self, file: &FileRef) {
        let internal = self.internally_deleted.lock().remove(file);
        if !internal && self.config.auto_repair_external_deletes {
            let info = self.store.refresh(file, None);
            if info.status() == FileStatus::DeletedLocally {
                log::debug!("after_delete: {file} deleted externally, scheduling removal");
                if let Err(e) = self.backend.remove(file.path(), true) {
                    log::warn!("Could not schedule removal of {file}: {e}");
                }
            }
        }

        let mut files = vec![file.clone()];
        files.extend(self.store.list_files(std::slice::from_ref(file), StatusMask::ALL));
        self.scheduler.refresh_async(&files, false);
    }

    // --- move / copy -----------------------------------------------------------

    pub fn before_move(&self, from: &FileRef, to: &FileRef) -> bool {
        self.accepts_transfer(from, to)
    }

    pub fn do_move(&self, from: &FileRef, to: &FileRef) -> Result<()> {
        self.transfer(Transfer::Move, from, to)
    }

    pub fn after_move(&self, from: &FileRef, to: &FileRef) {
        let mut files = vec![from.clone()];
        files.extend(self.store.list_files(std::slice::from_ref(from), StatusMask::ALL));
        self.after_transfer(files, to);
    }

    pub fn before_copy(&self, from: &FileRef, to: &FileRef) -> bool {
        self.accepts_transfer(from, to)
    }

    pub fn do_copy(&self, from: &FileRef, to: &FileRef) -> Result<()> {
        self.transfer(Transfer::Copy, from, to)
    }

    pub fn after_copy(&self, _from: &FileRef, to: &FileRef) {
        self.after_transfer(Vec::new(), to);
    }

    /// Strategy used to move or copy `from` onto `to`
    pub fn strategy(&self, from: &FileRef, to: &FileRef) -> TransferStrategy {
        let source = self.store.get_status(from);
        if source.status() == FileStatus::Added {
            return TransferStrategy::RevertAndTransfer;
        }
        if !source.status().is_versioned() {
            return TransferStrategy::Filesystem;
        }
        let source_root = self.backend.repository_root(from.path());
        let target_root = to
            .parent()
            .and_then(|parent| self.backend.repository_root(parent.path()));
        if source_root.is_some() && source_root == target_root {
            TransferStrategy::Backend
        } else {
            TransferStrategy::CrossRepository
        }
    }

    fn accepts_transfer(&self, from: &FileRef, to: &FileRef) -> bool {
        if self.backend.is_metadata(from.path()) || self.backend.is_metadata(to.path()) {
            return false;
        }
        let Some(target_dir) = to.parent() else {
            return false;
        };
        if self.backend.repository_root(target_dir.path()).is_none() {
            return false;
        }
        self.store.get_status(from).status().is_versioned()
            || self.store.get_status(&target_dir).status().is_versioned()
    }

    fn transfer(&self, kind: Transfer, from: &FileRef, to: &FileRef) -> Result<()> {
        let strategy = self.strategy(from, to);
        log::debug!("do_{}: {from} -> {to} using {strategy:?}", kind.name());

        let mut touched = Vec::new();
        let result = match strategy {
            TransferStrategy::Backend => self.with_lock_retry(|| match kind {
                Transfer::Move => self.backend.move_path(from.path(), to.path(), true),
                Transfer::Copy => self.backend.copy(from.path(), to.path()),
            }),
            TransferStrategy::RevertAndTransfer => {
                self.revert_and_transfer(kind, from, to, &mut touched)
            }
            TransferStrategy::CrossRepository => {
                self.transfer_across(kind, from, to, &mut touched)
            }
            TransferStrategy::Filesystem => match kind {
                Transfer::Move => fs_ops::move_path(from.path(), to.path()),
                Transfer::Copy => fs_ops::copy_tree(from.path(), to.path(), |_| false).map(|_| ()),
            }
            .map_err(BackendError::from),
        };

        match result {
            Ok(()) => {
                self.touched.lock().insert(to.clone(), touched);
                Ok(())
            }
            Err(e) => {
                log::warn!("{} of {from} to {to} failed: {e}", kind.name());
                self.touched.lock().remove(to);
                touched.push(from.clone());
                self.invalidate(&touched, to);
                Err(StatusCacheError::operation(kind.name(), from.path(), e))
            }
        }
    }

    fn revert_and_transfer(
        &self,
        kind: Transfer,
        from: &FileRef,
        to: &FileRef,
        touched: &mut Vec<FileRef>,
    ) -> BackendResult<()> {
        if kind == Transfer::Move {
            self.with_lock_retry(|| self.backend.revert(from.path(), true))?;
            fs_ops::move_path(from.path(), to.path())?;
        } else {
            fs_ops::copy_tree(from.path(), to.path(), |p| self.backend.is_metadata(p))?;
        }
        touched.push(from.clone());
        if self.backend.repository_root(to.path()).is_some() {
            touched.extend(self.add_tree(to)?);
        }
        Ok(())
    }

    fn transfer_across(
        &self,
        kind: Transfer,
        from: &FileRef,
        to: &FileRef,
        touched: &mut Vec<FileRef>,
    ) -> BackendResult<()> {
        let created = fs_ops::copy_tree(from.path(), to.path(), |p| self.backend.is_metadata(p))?;
        touched.extend(created.iter().map(FileRef::new));
        touched.extend(self.add_tree(to)?);

        if kind == Transfer::Move {
            touched.push(from.clone());
            self.with_lock_retry(|| self.backend.remove(from.path(), true))?;
            fs_ops::remove_path(from.path())?;
        }
        Ok(())
    }

    /// Schedule `root` and everything beneath it for addition
    fn add_tree(&self, root: &FileRef) -> BackendResult<Vec<FileRef>> {
        let mut added = Vec::new();
        let walker = walkdir::WalkDir::new(root.path())
            .into_iter()
            .filter_entry(|e| !self.backend.is_metadata(e.path()) && !self.backend.is_ignored(e.path()));
        for entry in walker {
            let entry = entry.map_err(|e| BackendError::from(std::io::Error::from(e)))?;
            let path = FileRef::new(entry.path());
            if entry.file_type().is_dir() {
                self.with_lock_retry(|| self.backend.add_directory(path.path()))?;
            } else {
                self.with_lock_retry(|| self.backend.add(path.path()))?;
            }
            added.push(path);
        }
        Ok(added)
    }

    fn after_transfer(&self, mut files: Vec<FileRef>, to: &FileRef) {
        if let Some(touched) = self.touched.lock().remove(to) {
            files.extend(touched);
        }
        self.scheduler
            .refresh_async(std::slice::from_ref(to), true);
        self.scheduler.refresh_async(&files, false);
    }

    // --- helpers -----------------------------------------------------------------

    /// Cached ancestors of `file` (and `file` itself) scheduled for deletion,
    /// outermost first
    fn scheduled_deletions(&self, file: &FileRef) -> Vec<FileRef> {
        let mut deleted: Vec<FileRef> = std::iter::successors(Some(file.clone()), FileRef::parent)
            .filter(|path| {
                self.store
                    .get_cached_status(path)
                    .is_some_and(|info| info.status().is_deletion())
            })
            .collect();
        deleted.reverse();
        deleted
    }

    fn invalidate(&self, touched: &[FileRef], root: &FileRef) {
        self.scheduler.refresh_async(touched, false);
        self.scheduler
            .refresh_async(std::slice::from_ref(root), true);
    }

    /// Run `op`, retrying while a concurrent process holds the working copy lock
    fn with_lock_retry<T>(&self, mut op: impl FnMut() -> BackendResult<T>) -> BackendResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_working_copy_locked() && attempt < self.config.lock_retry_attempts => {
                    log::debug!("working copy locked (attempt {attempt}): {e}");
                    std::thread::sleep(self.config.lock_retry_backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl std::fmt::Debug for FilesystemInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemInterceptor")
            .field("config", &self.config)
            .finish()
    }
}

/// Create an empty file unless a revert already brought it back
fn create_file(file: &FileRef) -> std::io::Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent.path())?;
    }
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(file.path())
        .map(|_| ())
}
