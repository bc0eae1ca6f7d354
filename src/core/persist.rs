//! Opportunistic on-disk snapshots of the status store.
//!
//! One JSON file per working-copy root under the user cache directory,
//! keyed by an md5 hash of the root path. Snapshots only warm the cache;
//! every loaded entry is still subject to normal refreshes.

use crate::core::dirs::get_cache_directory;
use crate::core::error::{Result, StatusCacheError};
use crate::core::file_ref::FileRef;
use crate::core::store::{StatusStore, StoreSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SNAPSHOT_FILE: &str = "status.json";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    saved_at: DateTime<Utc>,
    snapshot: StoreSnapshot,
}

/// Directory holding the snapshot of `root` below `cache_home`
pub fn snapshot_dir(cache_home: &Path, root: &FileRef) -> PathBuf {
    let root_hash = format!("{:x}", md5::compute(root.path().to_string_lossy().as_bytes()));
    log::debug!("snapshot_dir: root = {root}, hash = {root_hash}");
    cache_home.join(root_hash)
}

/// Save the entries under `root` to the user cache directory
pub fn save_snapshot(store: &StatusStore, root: &FileRef) -> Result<PathBuf> {
    let cache_home = get_cache_directory().map_err(|e| {
        log::warn!("Failed to determine cache directory: {e}");
        e
    })?;
    save_snapshot_in(&cache_home, store, root)
}

pub fn save_snapshot_in(cache_home: &Path, store: &StatusStore, root: &FileRef) -> Result<PathBuf> {
    let dir = snapshot_dir(cache_home, root);
    if let Err(e) = fs::create_dir_all(&dir) {
        log::error!("Failed to create cache directory '{}': {}", dir.display(), e);
        return Err(StatusCacheError::cache_directory_creation_failed(&dir, e));
    }

    let file = SnapshotFile {
        saved_at: Utc::now(),
        snapshot: store.export_snapshot(root),
    };
    let json = serde_json::to_string_pretty(&file)?;

    let path = dir.join(SNAPSHOT_FILE);
    if let Err(e) = fs::write(&path, json) {
        log::error!("Failed to write snapshot file '{}': {}", path.display(), e);
        return Err(StatusCacheError::snapshot_write_failed(&path, e));
    }
    log::debug!(
        "Saved {} directories of {root} to {}",
        file.snapshot.directories.len(),
        path.display()
    );
    Ok(path)
}

/// Load the snapshot of `root`, if any. Returns whether one was found.
pub fn load_snapshot(store: &StatusStore, root: &FileRef) -> Result<bool> {
    let cache_home = get_cache_directory()?;
    load_snapshot_in(&cache_home, store, root)
}

pub fn load_snapshot_in(cache_home: &Path, store: &StatusStore, root: &FileRef) -> Result<bool> {
    let path = snapshot_dir(cache_home, root).join(SNAPSHOT_FILE);
    if !path.exists() {
        log::debug!("No snapshot for {root} at {}", path.display());
        return Ok(false);
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        log::error!("Failed to read snapshot file '{}': {}", path.display(), e);
        StatusCacheError::snapshot_read_failed(&path, e)
    })?;
    let file: SnapshotFile = serde_json::from_str(&content).map_err(|e| {
        log::error!("Failed to parse snapshot file '{}': {}", path.display(), e);
        StatusCacheError::snapshot_parse_failed(&path, e)
    })?;

    if file.snapshot.root != *root {
        log::warn!(
            "Snapshot at {} belongs to {}, ignoring it",
            path.display(),
            file.snapshot.root
        );
        return Ok(false);
    }
    log::debug!(
        "Loaded snapshot of {root} saved at {}",
        file.saved_at.format("%Y-%m-%d %H:%M:%S")
    );
    store.import_snapshot(file.snapshot);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::git::GitBackend;
    use crate::core::status::{FileStatus, StatusInfo, StatusMask};
    use crate::core::store::DirectorySnapshot;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> StatusStore {
        StatusStore::new(Arc::new(GitBackend::new()))
    }

    #[test]
    fn test_snapshot_dir_is_stable_per_root() {
        let home = Path::new("/cache");
        let a = snapshot_dir(home, &FileRef::new("/wc/a"));
        assert_eq!(a, snapshot_dir(home, &FileRef::new("/wc/a/")));
        assert_ne!(a, snapshot_dir(home, &FileRef::new("/wc/b")));
        assert!(a.starts_with(home));
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let cache = TempDir::new()?;
        let root = FileRef::new("/nonexistent/wc");
        let source = store();
        source.import_snapshot(StoreSnapshot {
            root: root.clone(),
            directories: vec![DirectorySnapshot {
                dir: root.clone(),
                files: vec![(
                    root.join("a.txt"),
                    StatusInfo::new(FileStatus::Modified, false),
                )],
            }],
        });
        save_snapshot_in(cache.path(), &source, &root)?;

        let target = store();
        assert!(load_snapshot_in(cache.path(), &target, &root)?);
        assert!(target.contains_files(std::slice::from_ref(&root), StatusMask::LOCAL_CHANGE));
        Ok(())
    }

    #[test]
    fn test_missing_snapshot_is_not_an_error() -> Result<()> {
        let cache = TempDir::new()?;
        assert!(!load_snapshot_in(cache.path(), &store(), &FileRef::new("/wc"))?);
        Ok(())
    }

    #[test]
    fn test_corrupt_snapshot_reports_parse_error() -> Result<()> {
        let cache = TempDir::new()?;
        let root = FileRef::new("/wc");
        let dir = snapshot_dir(cache.path(), &root);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(SNAPSHOT_FILE), "{ not json")?;

        let err = load_snapshot_in(cache.path(), &store(), &root).unwrap_err();
        assert!(matches!(err, StatusCacheError::SnapshotParseFailed { .. }));
        Ok(())
    }
}
