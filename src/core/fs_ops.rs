//! Plain filesystem helpers shared by the git backend and the interceptor.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Copy a file or a directory tree, skipping paths for which `skip` is true.
///
/// Returns every created destination path, parents before children.
pub fn copy_tree(from: &Path, to: &Path, skip: impl Fn(&Path) -> bool) -> io::Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    if !from.is_dir() {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        created.push(to.to_path_buf());
        return Ok(created);
    }

    for entry in walkdir::WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| !skip(e.path()))
    {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = if rel.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(rel)
        };
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
        created.push(target);
    }
    Ok(created)
}

/// Remove a file or directory tree if it is still there
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Rename, falling back to copy and delete across filesystems
pub fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::debug!("rename {} -> {} failed ({e}), copying", from.display(), to.display());
            copy_tree(from, to, |_| false)?;
            remove_path(from)
        }
    }
}
