//! The status store: per-directory status maps plus the reverse index.
//!
//! This is the single source of status truth. Every other component reads
//! and refreshes through [`StatusStore`].
//!
//! # Locking
//! - `tables` guards both the directory entries and the reverse index, so the
//!   two are always updated in one critical section.
//! - Each directory has a refresh lock held across the backend query, the
//!   equivalence check and the write for any file directly inside it. Two
//!   refreshes of the same file therefore never interleave.
//! - While a refresh lock is held only the cheap backend checks
//!   (`repository_root`, `is_metadata`, `is_ignored`) and cached reads are
//!   used. The store never scans or refreshes another path in that window.
//! - Listeners and recursive follow-up refreshes run after every lock is
//!   released.
//!
//! Read paths never fail. Backend query failures are logged and degrade to
//! a status derived from local filesystem facts.

use crate::core::backend::VcsBackend;
use crate::core::file_ref::FileRef;
use crate::core::index::ReverseIndex;
use crate::core::listeners::{ListenerId, ListenerRegistry, StatusChangeEvent, StatusListener};
use crate::core::status::{
    FileStatus, NodeKind, RemoteChange, RepositoryHint, StatusInfo, StatusMask, StatusRecord,
    TextStatus,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Known non-trivial children of one directory
pub type DirectoryEntry = HashMap<FileRef, StatusInfo>;

pub const DEFAULT_SIZE_WARNING_THRESHOLD: usize = 100_000;

#[derive(Debug, Default)]
struct Tables {
    dirs: HashMap<FileRef, DirectoryEntry>,
    index: ReverseIndex,
}

impl Tables {
    fn put(&mut self, dir: &FileRef, file: &FileRef, info: Option<StatusInfo>) -> Option<StatusInfo> {
        let entry = self.dirs.entry(dir.clone()).or_default();
        let old = entry.remove(file);
        self.index.update(file, old.as_ref(), info.as_ref());
        if let Some(info) = info {
            entry.insert(file.clone(), info);
        }
        old
    }

    /// Forget a directory's own entry map together with its index entries
    fn drop_directory(&mut self, dir: &FileRef) {
        if let Some(children) = self.dirs.remove(dir) {
            for (file, info) in &children {
                self.index.remove(file, info);
            }
        }
    }
}

/// Serializable copy of the directory entries under one working-copy root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub root: FileRef,
    pub directories: Vec<DirectorySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub dir: FileRef,
    pub files: Vec<(FileRef, StatusInfo)>,
}

pub struct StatusStore {
    backend: Arc<dyn VcsBackend>,
    tables: RwLock<Tables>,
    refresh_locks: Mutex<HashMap<FileRef, Arc<Mutex<()>>>>,
    listeners: ListenerRegistry,
    ready: AtomicBool,
    size_warning_threshold: usize,
}

impl StatusStore {
    pub fn new(backend: Arc<dyn VcsBackend>) -> Self {
        Self {
            backend,
            tables: RwLock::new(Tables::default()),
            refresh_locks: Mutex::new(HashMap::new()),
            listeners: ListenerRegistry::new(),
            ready: AtomicBool::new(false),
            size_warning_threshold: DEFAULT_SIZE_WARNING_THRESHOLD,
        }
    }

    pub fn with_size_warning_threshold(mut self, threshold: usize) -> Self {
        self.size_warning_threshold = threshold;
        self
    }

    pub fn backend(&self) -> &Arc<dyn VcsBackend> {
        &self.backend
    }

    // --- Queries -------------------------------------------------------------

    /// Authoritative status of `file`, scanning its directory on first access.
    ///
    /// May block on the backend. Never fails.
    pub fn get_status(&self, file: &FileRef) -> StatusInfo {
        if self.backend.is_metadata(file.path()) {
            return StatusInfo::not_managed(true);
        }
        let Some(dir) = file.parent() else {
            return StatusInfo::not_managed(true);
        };
        if !self.ensure_scanned(&dir) {
            return self.classify_unstored(file);
        }
        if let Some(info) = self.cached_in(&dir, file) {
            return info;
        }
        if !file.exists() {
            return StatusInfo::unknown();
        }
        if file.is_dir() {
            self.refresh(file, None)
        } else {
            StatusInfo::new(FileStatus::UpToDate, false)
        }
    }

    /// Status already materialized for `file`; never scans nor queries.
    pub fn get_cached_status(&self, file: &FileRef) -> Option<StatusInfo> {
        match file.parent() {
            Some(dir) => self.cached_in(&dir, file),
            None => Some(StatusInfo::not_managed(true)),
        }
    }

    fn cached_in(&self, dir: &FileRef, file: &FileRef) -> Option<StatusInfo> {
        self.tables
            .read()
            .dirs
            .get(dir)
            .and_then(|entry| entry.get(file))
            .cloned()
    }

    /// Every file under `roots` (roots included) whose status intersects `mask`
    pub fn list_files(&self, roots: &[FileRef], mask: StatusMask) -> BTreeSet<FileRef> {
        let mut found = BTreeSet::new();
        {
            let tables = self.tables.read();
            for root in roots {
                found.extend(tables.index.files_under(root, mask));
            }
        }
        for root in roots {
            if self
                .get_cached_status(root)
                .is_some_and(|info| info.matches(mask))
            {
                found.insert(root.clone());
            }
        }
        found
    }

    /// Short-circuiting variant of [`list_files`](Self::list_files)
    pub fn contains_files(&self, roots: &[FileRef], mask: StatusMask) -> bool {
        let in_index = {
            let tables = self.tables.read();
            roots.iter().any(|root| tables.index.any_under(root, mask))
        };
        in_index
            || roots.iter().any(|root| {
                self.get_cached_status(root)
                    .is_some_and(|info| info.matches(mask))
            })
    }

    /// Known children of `dir` (files with a non-trivial status and directories)
    pub fn list_dir(&self, dir: &FileRef) -> Vec<FileRef> {
        let mut files: Vec<FileRef> = self
            .tables
            .read()
            .dirs
            .get(dir)
            .map(|entry| entry.keys().cloned().collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// True once `dir` has a directory entry (scanned, possibly empty)
    pub fn is_scanned(&self, dir: &FileRef) -> bool {
        self.tables.read().dirs.contains_key(dir)
    }

    /// Scan `dir` unless it already has an entry; false when it holds no managed files
    pub fn scan_directory(&self, dir: &FileRef) -> bool {
        self.ensure_scanned(dir)
    }

    /// Scan `root` and every non-ignored directory beneath it
    pub fn scan_tree(&self, root: &FileRef) -> usize {
        let walker = walkdir::WalkDir::new(root.path())
            .into_iter()
            .filter_entry(|entry| {
                entry.file_type().is_dir()
                    && !self.backend.is_metadata(entry.path())
                    && (entry.depth() == 0
                        || self.get_status(&FileRef::new(entry.path())).status()
                            != FileStatus::Excluded)
            });
        let mut scanned = 0;
        for entry in walker.filter_map(|entry| entry.ok()) {
            if self.ensure_scanned(&FileRef::new(entry.path())) {
                scanned += 1;
            }
        }
        scanned
    }

    /// Number of stored (file, status) pairs
    pub fn len(&self) -> usize {
        self.tables.read().dirs.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- Refresh -------------------------------------------------------------

    /// Recompute the status of exactly one file.
    ///
    /// A supplied hint carrying a local record short-circuits the backend
    /// query. Listeners are notified only when the new value is not
    /// equivalent to the cached one.
    pub fn refresh(&self, file: &FileRef, hint: Option<&RepositoryHint>) -> StatusInfo {
        if self.backend.is_metadata(file.path()) {
            return StatusInfo::not_managed(true);
        }
        let Some(dir) = file.parent() else {
            return StatusInfo::not_managed(true);
        };
        if !self.ensure_scanned(&dir) {
            return self.classify_unstored(file);
        }

        let (current, info, mut content, changed) = {
            let lock = self.refresh_lock(&dir);
            let _guard = lock.lock();

            let current = self.cached_in(&dir, file);
            let record = self.query_record(file, hint);
            let info = self.create_file_information(file, record, hint);

            let unchanged = current.as_ref().is_some_and(|c| info.is_equivalent(c))
                || (current.is_none() && !info.is_storable());
            if unchanged {
                (current, info, None, false)
            } else {
                // children of a vanished directory must be listed before the write drops them
                let content = match &current {
                    Some(c)
                        if info.status() == FileStatus::Unknown
                            && c.is_directory()
                            && c.status().is_deletion() =>
                    {
                        log::debug!("refresh: will need recursive refresh for deleted folder {file}");
                        Some(self.list_files(std::slice::from_ref(file), StatusMask::ALL))
                    }
                    _ => None,
                };

                let mut tables = self.tables.write();
                let stored = info.is_storable().then(|| info.clone());
                tables.put(&dir, file, stored);
                if info.status() == FileStatus::Unknown {
                    tables.drop_directory(file);
                }
                (current, info, content, true)
            }
        };

        if !changed {
            return info;
        }

        let is_directory = file.is_dir()
            || info.is_directory()
            || current.as_ref().is_some_and(StatusInfo::is_directory);
        if content.is_none() && is_directory && need_recursive_refresh(&info, current.as_ref()) {
            log::debug!("refresh: need recursive refresh for {file}");
            content = Some(self.list_dir(file).into_iter().collect());
        }
        if let Some(children) = content {
            for child in children.iter().filter(|child| *child != file) {
                log::debug!("refresh: recursive refresh for {child}, child of {file}");
                self.refresh(child, None);
            }
        }

        self.listeners.fire(&StatusChangeEvent {
            file: file.clone(),
            old: current,
            new: info.clone(),
        });
        info
    }

    /// Refresh `root` and, unless it is ignored, everything on disk beneath it
    pub fn refresh_recursively(&self, root: &FileRef) {
        let info = self.refresh(root, None);
        if info.status() == FileStatus::Excluded {
            return;
        }
        for child in self.list_children_on_disk(root) {
            self.refresh_recursively(&child);
        }
    }

    /// Refresh every cached, non-ignored file under `roots`
    pub fn refresh_cached(&self, roots: &[FileRef]) {
        for file in self.list_files(roots, !FileStatus::Excluded.bit()) {
            self.refresh(&file, None);
        }
    }

    /// Re-examine every known child of `dir`
    pub fn directory_content_changed(&self, dir: &FileRef) {
        for file in self.list_dir(dir) {
            self.refresh(&file, None);
        }
    }

    /// Replace the revision of cached records after a commit, without a backend call
    pub fn patch_revision(&self, files: &[FileRef], revision: &str) {
        for file in files {
            let Some(dir) = file.parent() else {
                continue;
            };
            let lock = self.refresh_lock(&dir);
            let _guard = lock.lock();
            let Some(patched) = self
                .cached_in(&dir, file)
                .and_then(|info| info.with_patched_revision(revision))
            else {
                continue;
            };
            self.tables.write().put(&dir, file, Some(patched));
        }
    }

    /// Refresh indexed local changes and drop entries that no longer exist.
    ///
    /// Meant to run once after [`compute_index`](Self::compute_index).
    pub fn clean_up(&self) {
        let indexed = self.tables.read().index.all_files(StatusMask::ALL);
        if indexed.len() > self.size_warning_threshold {
            log::warn!("Cache contains too many entries: {}", indexed.len());
        }

        for file in &indexed {
            match self.get_cached_status(file) {
                Some(info) if info.matches(StatusMask::LOCAL_CHANGE) => {
                    self.refresh(file, None);
                }
                Some(info) if info.status() != FileStatus::Excluded => {}
                // excluded entries are only dropped, never re-queried
                _ => {
                    if !file.exists() {
                        self.refresh(file, None);
                    }
                }
            }
        }

        let vanished: Vec<FileRef> = self
            .tables
            .read()
            .dirs
            .keys()
            .filter(|dir| !dir.exists() && self.backend.repository_root(dir.path()).is_none())
            .cloned()
            .collect();
        if !vanished.is_empty() {
            let mut tables = self.tables.write();
            for dir in &vanished {
                log::debug!("clean_up: dropping entry of vanished directory {dir}");
                tables.drop_directory(dir);
            }
        }

        self.refresh_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    // --- Index and readiness ---------------------------------------------------

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Rebuild the reverse index from the directory entries and mark the store ready
    pub fn compute_index(&self) {
        {
            let mut tables = self.tables.write();
            let Tables { dirs, index } = &mut *tables;
            index.rebuild(dirs.values().flat_map(|entry| entry.iter()));
            log::debug!("compute_index: {} indexed entries", index.len());
        }
        self.ready.store(true, Ordering::Release);
    }

    // --- Persistence -------------------------------------------------------------

    /// Copy of every directory entry at or beneath `root`
    pub fn export_snapshot(&self, root: &FileRef) -> StoreSnapshot {
        let tables = self.tables.read();
        let mut directories: Vec<DirectorySnapshot> = tables
            .dirs
            .iter()
            .filter(|(dir, _)| dir.is_under(root))
            .map(|(dir, entry)| {
                let mut files: Vec<(FileRef, StatusInfo)> =
                    entry.iter().map(|(f, i)| (f.clone(), i.clone())).collect();
                files.sort_by(|a, b| a.0.cmp(&b.0));
                DirectorySnapshot {
                    dir: dir.clone(),
                    files,
                }
            })
            .collect();
        directories.sort_by(|a, b| a.dir.cmp(&b.dir));
        StoreSnapshot {
            root: root.clone(),
            directories,
        }
    }

    /// Load previously exported entries. The reverse index is rebuilt.
    pub fn import_snapshot(&self, snapshot: StoreSnapshot) {
        let mut tables = self.tables.write();
        for directory in snapshot.directories {
            let entry: DirectoryEntry = directory
                .files
                .into_iter()
                .filter(|(_, info)| info.is_storable())
                .collect();
            tables.dirs.insert(directory.dir, entry);
        }
        let Tables { dirs, index } = &mut *tables;
        index.rebuild(dirs.values().flat_map(|entry| entry.iter()));
    }

    // --- Listeners -----------------------------------------------------------------

    pub fn subscribe(&self, listener: Arc<dyn StatusListener>) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    // --- Internals -------------------------------------------------------------------

    fn refresh_lock(&self, dir: &FileRef) -> Arc<Mutex<()>> {
        Arc::clone(self.refresh_locks.lock().entry(dir.clone()).or_default())
    }

    /// Make sure `dir` has an entry, scanning it if needed.
    ///
    /// Returns false when `dir` can hold no managed files.
    fn ensure_scanned(&self, dir: &FileRef) -> bool {
        if self.backend.is_metadata(dir.path()) {
            return false;
        }

        let known = self
            .tables
            .read()
            .dirs
            .get(dir)
            .map(|entry| entry.contains_key(dir));
        let Some(corrupted) = known else {
            if self.backend.repository_root(dir.path()).is_none() {
                return false;
            }
            return self.scan(dir);
        };
        if corrupted {
            log::warn!("Corrupted cached entry for folder {dir}, it contains itself");
            let mut tables = self.tables.write();
            if let Some(info) = tables.dirs.get_mut(dir).and_then(|entry| entry.remove(dir)) {
                tables.index.remove(dir, &info);
            }
        }
        true
    }

    fn scan(&self, dir: &FileRef) -> bool {
        let events = {
            let lock = self.refresh_lock(dir);
            let _guard = lock.lock();
            if self.is_scanned(dir) {
                return true;
            }

            let files = self.scan_folder(dir);
            log::debug!("scanned {dir}: {} entries", files.len());

            let mut tables = self.tables.write();
            let events: Vec<StatusChangeEvent> = files
                .iter()
                .filter(|(_, info)| {
                    info.matches(StatusMask::LOCAL_CHANGE | FileStatus::Excluded.bit())
                })
                .map(|(file, info)| StatusChangeEvent {
                    file: file.clone(),
                    old: None,
                    new: info.clone(),
                })
                .collect();
            for (file, info) in &files {
                tables.index.insert(file, info);
            }
            tables.dirs.insert(dir.clone(), files);
            events
        };

        for event in &events {
            self.listeners.fire(event);
        }
        true
    }

    /// Merge backend records with the directory listing on disk
    fn scan_folder(&self, dir: &FileRef) -> DirectoryEntry {
        let local: Vec<FileRef> = self.list_children_on_disk(dir);
        let mut folder_files = DirectoryEntry::new();

        let records = if self.is_parent_ignored(dir) {
            None
        } else {
            match self.backend.recursive_status(dir.path()) {
                Ok(records) => Some(records),
                Err(e) => {
                    if !e.is_unversioned() {
                        log::warn!("Can not get status of {dir}: {e}");
                    }
                    None
                }
            }
        };

        let Some(records) = records else {
            for file in local {
                let info = self.create_file_information(&file, None, None);
                if info.is_storable() {
                    folder_files.insert(file, info);
                }
            }
            return folder_files;
        };

        let mut reported: HashSet<FileRef> = HashSet::new();
        let mut implied: BTreeSet<FileRef> = BTreeSet::new();
        for record in records {
            let file = FileRef::new(&record.path);
            if &file == dir || !file.is_under(dir) || self.backend.is_metadata(file.path()) {
                continue;
            }
            if file.parent().as_ref() == Some(dir) {
                reported.insert(file.clone());
                let info = self.create_file_information(&file, Some(record), None);
                if info.is_storable() {
                    folder_files.insert(file, info);
                }
            } else if let Some(child) = immediate_child(dir, &file) {
                implied.insert(child);
            }
        }

        // children the backend did not describe directly
        for file in local.into_iter().chain(implied) {
            if reported.contains(&file) || folder_files.contains_key(&file) {
                continue;
            }
            let info = if file.is_dir() || !file.exists() {
                let record = self.query_record(&file, None);
                self.create_file_information(&file, record, None)
            } else {
                StatusInfo::new(FileStatus::UpToDate, false)
            };
            if info.is_storable() {
                folder_files.insert(file, info);
            }
        }
        folder_files
    }

    fn query_record(&self, file: &FileRef, hint: Option<&RepositoryHint>) -> Option<StatusRecord> {
        if let Some(local) = hint.and_then(|h| h.local.clone()) {
            return Some(local);
        }
        if self.is_parent_ignored(file) {
            return None;
        }
        match self.backend.single_status(file.path()) {
            Ok(record) => record,
            Err(e) => {
                if !e.is_unversioned() {
                    log::warn!("Status query failed for {file}: {e}");
                }
                None
            }
        }
    }

    /// Status for a file whose directory is not stored (e.g. a working-copy root)
    fn classify_unstored(&self, file: &FileRef) -> StatusInfo {
        if self.backend.repository_root(file.path()).is_none() {
            return StatusInfo::not_managed(file.is_dir());
        }
        let record = self.query_record(file, None);
        self.create_file_information(file, record, None)
    }

    fn create_file_information(
        &self,
        file: &FileRef,
        record: Option<StatusRecord>,
        hint: Option<&RepositoryHint>,
    ) -> StatusInfo {
        if let Some(info) = record.and_then(|r| StatusInfo::from_record(r, hint)) {
            return info;
        }
        if self.backend.repository_root(file.path()).is_none() {
            return StatusInfo::not_managed(file.is_dir());
        }
        self.create_missing_entry_file_information(file, hint)
    }

    /// Classify a managed path the backend has no record for
    fn create_missing_entry_file_information(
        &self,
        file: &FileRef,
        hint: Option<&RepositoryHint>,
    ) -> StatusInfo {
        let exists = file.exists();
        let is_directory = exists && file.is_dir();
        let parent = file.parent();

        let parent_status = match &parent {
            Some(parent) => self.parent_status(parent),
            None => {
                log::warn!("Missing entry for filesystem root {file}");
                FileStatus::NotManaged
            }
        };
        if parent_status == FileStatus::Excluded {
            return StatusInfo::new(FileStatus::Excluded, is_directory);
        }
        if exists && parent_status == FileStatus::NotManaged {
            // working-copy root
            return if !is_directory {
                StatusInfo::not_managed(false)
            } else if self.backend.is_metadata(file.path()) {
                StatusInfo::not_managed(true)
            } else {
                StatusInfo::new(FileStatus::UpToDate, true)
            };
        }

        if exists {
            if let (Some(parent), Some(master)) = (&parent, file.file_name().and_then(conflict_master)) {
                if parent.join(master).is_file() {
                    return StatusInfo::new(FileStatus::Excluded, false);
                }
            }
            let external = hint
                .and_then(|h| h.local.as_ref())
                .is_some_and(|r| r.text == TextStatus::External);
            if external || self.backend.is_ignored(file.path()) {
                return StatusInfo::new(FileStatus::Excluded, is_directory);
            }
            return StatusInfo::new(FileStatus::NewLocally, is_directory);
        }

        match hint {
            Some(h) if matches!(h.text, RemoteChange::Added | RemoteChange::Replaced) => {
                StatusInfo::new(FileStatus::NewInRepository, h.kind == NodeKind::Dir)
            }
            _ => StatusInfo::unknown(),
        }
    }

    /// Cheap stand-in for the parent's status; never scans
    fn parent_status(&self, parent: &FileRef) -> FileStatus {
        if self.backend.repository_root(parent.path()).is_none() {
            return FileStatus::NotManaged;
        }
        if let Some(info) = self.get_cached_status(parent) {
            return info.status();
        }
        if self.backend.is_ignored(parent.path()) {
            FileStatus::Excluded
        } else {
            FileStatus::UpToDate
        }
    }

    fn is_parent_ignored(&self, file: &FileRef) -> bool {
        file.parent()
            .and_then(|parent| self.get_cached_status(&parent))
            .is_some_and(|info| info.status() == FileStatus::Excluded)
    }

    fn list_children_on_disk(&self, dir: &FileRef) -> Vec<FileRef> {
        let Ok(entries) = fs::read_dir(dir.path()) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| dir.join(entry.file_name()))
            .filter(|file| !self.backend.is_metadata(file.path()))
            .collect()
    }
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore")
            .field("ready", &self.ready())
            .field("listeners", &self.listeners)
            .finish()
    }
}

fn need_recursive_refresh(info: &StatusInfo, current: Option<&StatusInfo>) -> bool {
    let current = current.map(StatusInfo::status);
    let was_deleted = current.is_some_and(|status| status.is_deletion());
    if was_deleted != info.status().is_deletion() {
        return true;
    }
    matches!(
        info.status(),
        FileStatus::Excluded | FileStatus::NotManaged | FileStatus::NewLocally
    ) || matches!(
        current,
        Some(FileStatus::Excluded | FileStatus::NotManaged | FileStatus::Added)
    )
}

fn immediate_child(dir: &FileRef, descendant: &FileRef) -> Option<FileRef> {
    let rel = descendant.path().strip_prefix(dir.path()).ok()?;
    rel.components().next().map(|first| dir.join(first))
}

/// Master file name of an auxiliary conflict file such as `a.txt.mine`
/// or `a.txt.merge-left.r12`
pub fn conflict_master(name: &str) -> Option<&str> {
    for suffix in [".mine", ".working"] {
        if let Some(master) = name.strip_suffix(suffix) {
            return Some(master).filter(|m| !m.is_empty());
        }
    }
    let (head, last) = name.rsplit_once('.')?;
    let is_revision = last.len() > 1
        && last.starts_with('r')
        && last[1..].bytes().all(|b| b.is_ascii_digit());
    if !is_revision {
        return None;
    }
    let master = head
        .strip_suffix(".merge-left")
        .or_else(|| head.strip_suffix(".merge-right"))
        .unwrap_or(head);
    Some(master).filter(|m| !m.is_empty())
}
