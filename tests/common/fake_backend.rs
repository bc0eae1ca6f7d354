//! Scripted in-memory backend.
//!
//! Everything on disk under `root` is managed. Records are set by the test;
//! an existing path without a record is versioned and unchanged. Each
//! operation counts its calls and can be scripted to fail a number of times
//! with a given message.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use wc_status_cache::core::backend::{BackendResult, RevisionInfo, VcsBackend};
use wc_status_cache::core::error::BackendError;
use wc_status_cache::core::status::{NodeKind, StatusRecord, TextStatus};

pub const METADATA_DIR: &str = ".vcs";

#[derive(Default)]
pub struct FakeBackend {
    root: PathBuf,
    records: Mutex<HashMap<PathBuf, StatusRecord>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    queries: Mutex<Vec<PathBuf>>,
    failures: Mutex<HashMap<&'static str, (String, usize)>>,
}

impl FakeBackend {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn set(&self, path: &Path, kind: NodeKind, text: TextStatus) {
        self.records.lock().insert(
            path.to_path_buf(),
            StatusRecord::new(path, kind, text).with_revision("1"),
        );
    }

    pub fn clear(&self, path: &Path) {
        self.records.lock().remove(path);
    }

    /// Fail the next `times` calls of `operation` with `message`
    pub fn fail(&self, operation: &'static str, message: &str, times: usize) {
        self.failures
            .lock()
            .insert(operation, (message.to_string(), times));
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    /// Single-file status queries issued for `path`
    pub fn queries_for(&self, path: &Path) -> usize {
        self.queries.lock().iter().filter(|p| p.as_path() == path).count()
    }

    fn enter(&self, operation: &'static str) -> BackendResult<()> {
        *self.calls.lock().entry(operation).or_default() += 1;
        let mut failures = self.failures.lock();
        if let Some((message, left)) = failures.get_mut(operation) {
            if *left > 0 {
                *left -= 1;
                return Err(BackendError::new(message.clone()));
            }
        }
        Ok(())
    }

    fn record_for(&self, path: &Path) -> Option<StatusRecord> {
        if let Some(record) = self.records.lock().get(path) {
            return Some(record.clone());
        }
        if path.is_dir() {
            return Some(StatusRecord::new(path, NodeKind::Dir, TextStatus::Normal));
        }
        path.exists()
            .then(|| StatusRecord::new(path, NodeKind::File, TextStatus::Normal))
    }
}

impl VcsBackend for FakeBackend {
    fn repository_root(&self, path: &Path) -> Option<PathBuf> {
        path.starts_with(&self.root).then(|| self.root.clone())
    }

    fn is_metadata(&self, path: &Path) -> bool {
        path.components().any(|c| c.as_os_str() == METADATA_DIR)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "tmp")
    }

    fn single_status(&self, path: &Path) -> BackendResult<Option<StatusRecord>> {
        self.enter("single_status")?;
        self.queries.lock().push(path.to_path_buf());
        Ok(self.record_for(path))
    }

    fn recursive_status(&self, dir: &Path) -> BackendResult<Vec<StatusRecord>> {
        self.enter("recursive_status")?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|record| record.path.starts_with(dir))
            .cloned()
            .collect())
    }

    fn remove(&self, path: &Path, _recursive: bool) -> BackendResult<()> {
        self.enter("remove")?;
        let text = self.records.lock().get(path).map(|record| record.text);
        let unversioned = match text {
            Some(text) => text == TextStatus::Unversioned,
            None => !path.exists(),
        };
        if unversioned {
            return Err(BackendError::new(format!(
                "'{}' is not under version control",
                path.display()
            )));
        }
        let kind = if path.is_dir() {
            NodeKind::Dir
        } else {
            NodeKind::File
        };
        self.set(path, kind, TextStatus::Deleted);
        Ok(())
    }

    fn move_path(&self, from: &Path, to: &Path, _force: bool) -> BackendResult<()> {
        self.enter("move")?;
        fs::rename(from, to)?;
        self.set(from, NodeKind::File, TextStatus::Deleted);
        self.set(to, NodeKind::File, TextStatus::Added);
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> BackendResult<()> {
        self.enter("copy")?;
        fs::copy(from, to)?;
        self.set(to, NodeKind::File, TextStatus::Added);
        Ok(())
    }

    fn add(&self, path: &Path) -> BackendResult<()> {
        self.enter("add")?;
        let kind = if path.is_dir() {
            NodeKind::Dir
        } else {
            NodeKind::File
        };
        self.set(path, kind, TextStatus::Added);
        Ok(())
    }

    fn revert(&self, path: &Path, _recursive: bool) -> BackendResult<()> {
        self.enter("revert")?;
        self.clear(path);
        Ok(())
    }

    fn lock(&self, _path: &Path) -> BackendResult<()> {
        Err(BackendError::unsupported("lock"))
    }

    fn unlock(&self, _path: &Path) -> BackendResult<()> {
        Err(BackendError::unsupported("unlock"))
    }

    fn info(&self, _path: &Path) -> BackendResult<RevisionInfo> {
        self.enter("info")?;
        Ok(RevisionInfo {
            revision: Some("r1".to_string()),
            last_changed_revision: Some("r1".to_string()),
            last_author: Some("tester".to_string()),
            last_changed: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).single(),
            sticky: Some("trunk".to_string()),
        })
    }

    fn mime_type(&self, path: &Path) -> BackendResult<Option<String>> {
        self.enter("mime_type")?;
        Ok(path
            .extension()
            .is_some_and(|ext| ext == "png")
            .then(|| "image/png".to_string()))
    }
}
