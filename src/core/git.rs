//! Git implementation of the backend adapter.
//!
//! Reads go through `git2` (status, ignore rules, repository discovery);
//! mutations run the `git` executable in the working directory so that hooks,
//! index locking and rename detection behave exactly like the user's own git.
//!
//! # Key Features
//! - **Status reading**: Convert git2 status flags to typed [`StatusRecord`] entries
//! - **Directory status**: Synthesized from index contents, since git tracks files only
//! - **Mutations**: rm, mv, add and reset executed as git commands
//! - **Labels**: HEAD revision, branch name and last commit touching a path

use crate::core::backend::{BackendResult, RevisionInfo, VcsBackend};
use crate::core::error::BackendError;
use crate::core::fs_ops;
use crate::core::status::{NodeKind, StatusRecord, TextStatus};
use chrono::{TimeZone, Utc};
use git2::{Repository, Status, StatusOptions};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

const METADATA_DIR: &str = ".git";
const BINARY_SNIFF_LEN: usize = 8000;

/// Backend over local git working copies
#[derive(Debug, Default, Clone)]
pub struct GitBackend;

/// An opened repository plus the path of interest relative to its workdir
struct Located {
    repo: Repository,
    workdir: PathBuf,
    relative: PathBuf,
}

impl GitBackend {
    pub fn new() -> Self {
        GitBackend
    }

    fn locate(&self, path: &Path) -> Option<Located> {
        let start = nearest_existing(path)?;
        let repo = Repository::discover(&start).ok()?;
        let workdir = repo.workdir()?.to_path_buf();
        let relative = relative_to(&workdir, path)?;
        Some(Located {
            repo,
            workdir,
            relative,
        })
    }

    fn locate_or_err(&self, path: &Path) -> BackendResult<Located> {
        self.locate(path).ok_or_else(|| {
            BackendError::new(format!("'{}' is not under version control", path.display()))
        })
    }

    /// Execute a git command in the repository's working directory
    fn run_git(&self, workdir: &Path, args: &[&str]) -> BackendResult<String> {
        log::debug!("git {} (in {})", args.join(" "), workdir.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(workdir)
            .output()
            .map_err(BackendError::from)?;

        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::new(format!(
                "git command failed: {}",
                error_msg.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn head_details(repo: &Repository) -> (Option<String>, Option<String>) {
        match repo.head() {
            Ok(head) => {
                let revision = head.target().map(|oid| oid.to_string()[..7].to_string());
                let branch = if head.is_branch() {
                    head.shorthand().map(str::to_string)
                } else {
                    None
                };
                (revision, branch)
            }
            Err(_) => (None, None),
        }
    }

    fn index_has_prefix(repo: &Repository, relative: &Path) -> BackendResult<bool> {
        let index = repo.index()?;
        let prefix = format!("{}/", relative.to_string_lossy());
        Ok(index
            .iter()
            .any(|entry| String::from_utf8_lossy(&entry.path).starts_with(&prefix)))
    }

    fn head_has_path(repo: &Repository, relative: &Path) -> bool {
        repo.head()
            .and_then(|head| head.peel_to_tree())
            .and_then(|tree| tree.get_path(relative).map(|_| ()))
            .is_ok()
    }

    /// True when HEAD has a tree (not a blob) at `relative`
    fn head_has_directory(repo: &Repository, relative: &Path) -> bool {
        repo.head()
            .and_then(|head| head.peel_to_tree())
            .and_then(|tree| tree.get_path(relative))
            .is_ok_and(|entry| entry.kind() == Some(git2::ObjectType::Tree))
    }

    fn directory_record(&self, located: &Located, path: &Path) -> BackendResult<StatusRecord> {
        let repo = &located.repo;
        let relative = &located.relative;
        let exists = path.is_dir();
        let tracked = Self::index_has_prefix(repo, relative)?;

        let text = if tracked {
            if exists {
                TextStatus::Normal
            } else {
                TextStatus::Missing
            }
        } else if Self::head_has_path(repo, relative) {
            TextStatus::Deleted
        } else if exists && repo.is_path_ignored(relative).unwrap_or(false) {
            TextStatus::Ignored
        } else if exists {
            TextStatus::Unversioned
        } else {
            TextStatus::None
        };
        Ok(self.record(repo, path, NodeKind::Dir, text, false))
    }

    fn record(
        &self,
        repo: &Repository,
        path: &Path,
        kind: NodeKind,
        text: TextStatus,
        copied: bool,
    ) -> StatusRecord {
        let (revision, branch) = Self::head_details(repo);
        let mut record = StatusRecord::new(path, kind, text);
        record.copied = copied;
        record.revision = revision;
        record.url = branch;
        record
    }
}

/// Map git2 status flags onto a working-copy text status.
///
/// Returns the status and whether the entry is a copy (staged rename).
pub fn text_status_from_git2(flags: Status) -> (TextStatus, bool) {
    // Conflicted files (highest priority)
    if flags.contains(Status::CONFLICTED) {
        return (TextStatus::Conflicted, false);
    }
    if flags.contains(Status::IGNORED) {
        return (TextStatus::Ignored, false);
    }

    // Staged changes
    if flags.contains(Status::INDEX_NEW) {
        if flags.contains(Status::WT_DELETED) {
            return (TextStatus::Missing, false);
        }
        return (TextStatus::Added, false);
    }
    if flags.contains(Status::INDEX_DELETED) {
        return (TextStatus::Deleted, false);
    }
    if flags.contains(Status::INDEX_RENAMED) {
        return (TextStatus::Added, true);
    }

    // Working tree changes
    if flags.contains(Status::WT_NEW) {
        return (TextStatus::Unversioned, false);
    }
    if flags.contains(Status::WT_DELETED) {
        return (TextStatus::Missing, false);
    }
    if flags.intersects(
        Status::INDEX_MODIFIED
            | Status::INDEX_TYPECHANGE
            | Status::WT_MODIFIED
            | Status::WT_TYPECHANGE
            | Status::WT_RENAMED,
    ) {
        return (TextStatus::Modified, false);
    }

    (TextStatus::Normal, false)
}

impl VcsBackend for GitBackend {
    fn repository_root(&self, path: &Path) -> Option<PathBuf> {
        self.locate(path).map(|located| located.workdir)
    }

    fn is_metadata(&self, path: &Path) -> bool {
        path.components()
            .any(|c| matches!(c, Component::Normal(name) if name == METADATA_DIR))
    }

    fn is_ignored(&self, path: &Path) -> bool {
        match self.locate(path) {
            Some(located) if !located.relative.as_os_str().is_empty() => located
                .repo
                .is_path_ignored(&located.relative)
                .unwrap_or(false),
            _ => false,
        }
    }

    fn single_status(&self, path: &Path) -> BackendResult<Option<StatusRecord>> {
        let Some(located) = self.locate(path) else {
            return Ok(None);
        };
        if located.relative.as_os_str().is_empty() {
            // the working copy root itself
            return Ok(Some(self.record(
                &located.repo,
                path,
                NodeKind::Dir,
                TextStatus::Normal,
                false,
            )));
        }
        let directory = path.is_dir()
            || Self::index_has_prefix(&located.repo, &located.relative)?
            || (!path.exists() && Self::head_has_directory(&located.repo, &located.relative));
        if directory {
            return self.directory_record(&located, path).map(Some);
        }

        match located.repo.status_file(&located.relative) {
            Ok(flags) => {
                let (text, copied) = text_status_from_git2(flags);
                Ok(Some(self.record(
                    &located.repo,
                    path,
                    NodeKind::File,
                    text,
                    copied,
                )))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn recursive_status(&self, dir: &Path) -> BackendResult<Vec<StatusRecord>> {
        let located = self.locate_or_err(dir)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(true)
            .recurse_ignored_dirs(false);
        if !located.relative.as_os_str().is_empty() {
            opts.pathspec(located.relative.as_path())
                .disable_pathspec_match(true);
        }

        let statuses = located.repo.statuses(Some(&mut opts))?;
        let (revision, branch) = Self::head_details(&located.repo);
        let mut records = Vec::with_capacity(statuses.len());
        for entry in statuses.iter() {
            let Some(raw_path) = entry.path() else {
                log::warn!("Skipping status entry with non UTF-8 path");
                continue;
            };
            let kind = if raw_path.ends_with('/') {
                NodeKind::Dir
            } else {
                NodeKind::File
            };
            let path = located.workdir.join(raw_path.trim_end_matches('/'));
            let (text, copied) = text_status_from_git2(entry.status());
            let mut record = StatusRecord::new(&path, kind, text);
            record.copied = copied;
            record.revision = revision.clone();
            record.url = branch.clone();
            records.push(record);
        }
        Ok(records)
    }

    fn remove(&self, path: &Path, recursive: bool) -> BackendResult<()> {
        let located = self.locate_or_err(path)?;
        let relative = located.relative.to_string_lossy().into_owned();
        let mut args = vec!["rm", "-q", "-f"];
        if recursive {
            args.push("-r");
        }
        args.extend(["--", relative.as_str()]);
        self.run_git(&located.workdir, &args).map(|_| ())
    }

    fn move_path(&self, from: &Path, to: &Path, force: bool) -> BackendResult<()> {
        let located = self.locate_or_err(from)?;
        let target = relative_to(&located.workdir, to).ok_or_else(|| {
            BackendError::new(format!(
                "'{}' is outside the working copy of '{}'",
                to.display(),
                from.display()
            ))
        })?;
        let source = located.relative.to_string_lossy().into_owned();
        let target = target.to_string_lossy().into_owned();
        let mut args = vec!["mv"];
        if force {
            args.push("-f");
        }
        args.extend([source.as_str(), target.as_str()]);
        self.run_git(&located.workdir, &args).map(|_| ())
    }

    fn copy(&self, from: &Path, to: &Path) -> BackendResult<()> {
        // git has no copy history; copy the content and schedule it for addition
        fs_ops::copy_tree(from, to, |p| self.is_metadata(p))?;
        self.add(to)
    }

    fn add(&self, path: &Path) -> BackendResult<()> {
        let located = self.locate_or_err(path)?;
        let relative = located.relative.to_string_lossy().into_owned();
        self.run_git(&located.workdir, &["add", "--", relative.as_str()])
            .map(|_| ())
    }

    fn revert(&self, path: &Path, _recursive: bool) -> BackendResult<()> {
        let located = self.locate_or_err(path)?;
        let relative = located.relative.to_string_lossy().into_owned();
        if located.repo.head().is_ok() {
            self.run_git(&located.workdir, &["reset", "-q", "--", &relative])?;
            if !path.exists() && Self::head_has_path(&located.repo, &located.relative) {
                self.run_git(&located.workdir, &["checkout", "HEAD", "--", &relative])?;
            }
        } else {
            // unborn branch: only additions can be scheduled
            self.run_git(
                &located.workdir,
                &["rm", "-q", "-r", "--cached", "--ignore-unmatch", "--", &relative],
            )?;
        }
        Ok(())
    }

    fn lock(&self, _path: &Path) -> BackendResult<()> {
        Err(BackendError::unsupported("lock"))
    }

    fn unlock(&self, _path: &Path) -> BackendResult<()> {
        Err(BackendError::unsupported("unlock"))
    }

    fn info(&self, path: &Path) -> BackendResult<RevisionInfo> {
        let located = self.locate_or_err(path)?;
        let (revision, sticky) = Self::head_details(&located.repo);
        let mut info = RevisionInfo {
            revision,
            sticky,
            ..RevisionInfo::default()
        };
        if located.repo.head().is_err() {
            return Ok(info);
        }

        let relative = located.relative.to_string_lossy().into_owned();
        let mut args = vec!["log", "-1", "--format=%h%x00%an%x00%ct"];
        if !relative.is_empty() {
            args.extend(["--", relative.as_str()]);
        }
        let output = self.run_git(&located.workdir, &args)?;
        let mut fields = output.trim_end().split('\0');
        if let (Some(rev), Some(author), Some(time)) = (fields.next(), fields.next(), fields.next())
        {
            info.last_changed_revision = Some(rev.to_string());
            info.last_author = Some(author.to_string());
            info.last_changed = time
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        }
        Ok(info)
    }

    fn mime_type(&self, path: &Path) -> BackendResult<Option<String>> {
        if !path.is_file() {
            return Ok(None);
        }
        let mut buffer = Vec::with_capacity(BINARY_SNIFF_LEN);
        fs::File::open(path)?
            .take(BINARY_SNIFF_LEN as u64)
            .read_to_end(&mut buffer)?;
        // same heuristic git uses for diffs
        if buffer.contains(&0) {
            Ok(Some("application/octet-stream".to_string()))
        } else {
            Ok(None)
        }
    }
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
}

/// `path` relative to `workdir`, tolerating symlinked prefixes such as /tmp
fn relative_to(workdir: &Path, path: &Path) -> Option<PathBuf> {
    if let Ok(rel) = path.strip_prefix(workdir) {
        return Some(rel.to_path_buf());
    }
    let existing = nearest_existing(path)?;
    let canonical = existing.canonicalize().ok()?;
    let rest = path.strip_prefix(&existing).ok()?;
    let workdir = workdir.canonicalize().ok()?;
    canonical
        .join(rest)
        .strip_prefix(&workdir)
        .ok()
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_repo() -> std::io::Result<(TempDir, PathBuf)> {
        let temp_dir = TempDir::new()?;
        let repo_path = temp_dir.path().canonicalize()?;

        for args in [
            vec!["init", "-q"],
            vec!["config", "user.name", "Test User"],
            vec!["config", "user.email", "test@example.com"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(&repo_path)
                .output()?;
        }
        Ok((temp_dir, repo_path))
    }

    fn commit_all(repo: &Path) -> std::io::Result<()> {
        Command::new("git").args(["add", "-A"]).current_dir(repo).output()?;
        Command::new("git")
            .args(["commit", "-q", "-m", "commit"])
            .current_dir(repo)
            .output()?;
        Ok(())
    }

    #[test]
    fn test_recursive_status_matches_directory_literally() {
        let (_temp, repo) = setup_test_repo().unwrap();
        for dir in ["lib[1]", "lib1"] {
            fs::create_dir_all(repo.join(dir)).unwrap();
            fs::write(repo.join(dir).join("a.txt"), "one\n").unwrap();
        }
        commit_all(&repo).unwrap();
        for dir in ["lib[1]", "lib1"] {
            fs::write(repo.join(dir).join("a.txt"), "two\n").unwrap();
        }

        let records = GitBackend::new().recursive_status(&repo.join("lib[1]")).unwrap();
        let paths: Vec<PathBuf> = records.into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec![repo.join("lib[1]/a.txt")]);
    }

    #[test]
    fn test_status_flag_mapping() {
        assert_eq!(
            text_status_from_git2(Status::INDEX_NEW),
            (TextStatus::Added, false)
        );
        assert_eq!(
            text_status_from_git2(Status::INDEX_NEW | Status::WT_DELETED),
            (TextStatus::Missing, false)
        );
        assert_eq!(
            text_status_from_git2(Status::WT_MODIFIED),
            (TextStatus::Modified, false)
        );
        assert_eq!(
            text_status_from_git2(Status::WT_NEW),
            (TextStatus::Unversioned, false)
        );
        assert_eq!(
            text_status_from_git2(Status::CONFLICTED | Status::WT_MODIFIED),
            (TextStatus::Conflicted, false)
        );
        assert_eq!(
            text_status_from_git2(Status::INDEX_RENAMED),
            (TextStatus::Added, true)
        );
        assert_eq!(
            text_status_from_git2(Status::CURRENT),
            (TextStatus::Normal, false)
        );
    }

    #[test]
    fn test_metadata_detection() {
        let backend = GitBackend::new();
        assert!(backend.is_metadata(Path::new("/wc/.git")));
        assert!(backend.is_metadata(Path::new("/wc/.git/index")));
        assert!(!backend.is_metadata(Path::new("/wc/src/git.rs")));
    }

    #[test]
    fn test_repository_root_and_unmanaged() -> std::io::Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        let backend = GitBackend::new();
        let root = backend.repository_root(&repo.join("not/yet/there.txt"));
        assert_eq!(
            root.map(|r| r.canonicalize().unwrap()),
            Some(repo.clone())
        );

        let outside = TempDir::new()?;
        assert!(backend.repository_root(outside.path()).is_none());
        Ok(())
    }

    #[test]
    fn test_single_status_of_modified_and_new_files() -> std::io::Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        fs::write(repo.join("tracked.txt"), "one")?;
        commit_all(&repo)?;
        fs::write(repo.join("tracked.txt"), "two")?;
        fs::write(repo.join("new.txt"), "new")?;

        let backend = GitBackend::new();
        let tracked = backend.single_status(&repo.join("tracked.txt")).unwrap().unwrap();
        assert_eq!(tracked.text, TextStatus::Modified);
        assert!(tracked.revision.is_some());

        let new = backend.single_status(&repo.join("new.txt")).unwrap().unwrap();
        assert_eq!(new.text, TextStatus::Unversioned);
        Ok(())
    }

    #[test]
    fn test_directory_status_is_synthesized() -> std::io::Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        fs::create_dir_all(repo.join("src"))?;
        fs::write(repo.join("src/lib.rs"), "fn main() {}")?;
        fs::create_dir_all(repo.join("scratch"))?;
        commit_all(&repo)?;
        fs::write(repo.join("scratch/notes.txt"), "x")?;

        let backend = GitBackend::new();
        let src = backend.single_status(&repo.join("src")).unwrap().unwrap();
        assert_eq!(src.kind, NodeKind::Dir);
        assert_eq!(src.text, TextStatus::Normal);

        let scratch = backend.single_status(&repo.join("scratch")).unwrap().unwrap();
        assert_eq!(scratch.text, TextStatus::Unversioned);

        backend.remove(&repo.join("src"), true).unwrap();
        assert!(!repo.join("src").exists());
        let removed = backend.single_status(&repo.join("src")).unwrap().unwrap();
        assert_eq!(removed.kind, NodeKind::Dir);
        assert_eq!(removed.text, TextStatus::Deleted);
        Ok(())
    }

    #[test]
    fn test_recursive_status_lists_changes_under_dir() -> std::io::Result<()> {
        let (_temp_dir, repo) = setup_test_repo()?;
        fs::create_dir_all(repo.join("a/b"))?;
        fs::write(repo.join("a/b/deep.txt"), "1")?;
        fs::write(repo.join("top.txt"), "1")?;
        commit_all(&repo)?;
        fs::write(repo.join("a/b/deep.txt"), "2")?;
        fs::write(repo.join("top.txt"), "2")?;

        let backend = GitBackend::new();
        let records = backend.recursive_status(&repo.join("a")).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].path.ends_with("a/b/deep.txt"));
        assert_eq!(records[0].text, TextStatus::Modified);
        Ok(())
    }

    #[test]
    fn test_lock_is_unsupported() {
        let backend = GitBackend::new();
        assert!(backend.lock(Path::new("/wc/file")).is_err());
        assert!(backend.unlock(Path::new("/wc/file")).is_err());
    }

    #[test]
    fn test_mime_type_sniffs_binary_content() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let binary = temp_dir.path().join("blob.bin");
        let text = temp_dir.path().join("notes.txt");
        fs::write(&binary, [0u8, 1, 2, 3])?;
        fs::write(&text, "hello")?;

        let backend = GitBackend::new();
        assert_eq!(
            backend.mime_type(&binary).unwrap().as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(backend.mime_type(&text).unwrap(), None);
        Ok(())
    }
}
