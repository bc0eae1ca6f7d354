//! Structural file identifiers used as cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Normalized absolute path identifying a file or directory.
///
/// Two refs are equal when their normalized paths are equal. Ordering follows
/// path components, so every descendant of a directory sorts directly after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(PathBuf);

impl FileRef {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        FileRef(normalize(&absolute))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    pub fn parent(&self) -> Option<FileRef> {
        self.0.parent().map(|p| FileRef(p.to_path_buf()))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    pub fn join(&self, name: impl AsRef<Path>) -> FileRef {
        FileRef(normalize(&self.0.join(name)))
    }

    /// True when `self` is `ancestor` or lies beneath it
    pub fn is_under(&self, ancestor: &FileRef) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    pub fn exists(&self) -> bool {
        self.0.symlink_metadata().is_ok()
    }

    pub fn is_dir(&self) -> bool {
        self.0.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.0.is_file()
    }
}

/// Lexical normalization: drops `.` and resolves `..` without touching the disk
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for FileRef {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for FileRef {
    fn from(path: PathBuf) -> Self {
        FileRef::new(path)
    }
}

impl From<&Path> for FileRef {
    fn from(path: &Path) -> Self {
        FileRef::new(path)
    }
}
