//! Git repository management for tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use wc_status_cache::core::error::{BackendError, Result, StatusCacheError};

/// A repository in a temporary directory. Keep it alive for the whole test.
pub struct TestRepo {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestRepo {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }
}

/// Fresh repository with a user configured, no commits
pub fn setup_test_repo() -> Result<TestRepo> {
    let temp_dir = TempDir::new()?;
    let repo_path = temp_dir.path().canonicalize()?;

    git(&repo_path, &["init", "-q"])?;
    git(&repo_path, &["config", "user.name", "Test User"])?;
    git(&repo_path, &["config", "user.email", "test@example.com"])?;

    Ok(TestRepo {
        temp_dir,
        path: repo_path,
    })
}

/// Repository with `initial.txt` committed
pub fn setup_test_repo_with_initial_commit() -> Result<TestRepo> {
    let repo = setup_test_repo()?;
    create_file(&repo.path, "initial.txt", "initial content\n")?;
    git_add(&repo.path, "initial.txt")?;
    git_commit(&repo.path, "Initial commit")?;
    Ok(repo)
}

/// Write `content` to `filename`, creating parent directories
pub fn create_file(repo_path: &Path, filename: &str, content: &str) -> Result<()> {
    let path = repo_path.join(filename);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn git_add(repo_path: &Path, filename: &str) -> Result<()> {
    git(repo_path, &["add", filename]).map(|_| ())
}

pub fn git_commit(repo_path: &Path, message: &str) -> Result<()> {
    git(repo_path, &["commit", "-q", "-m", message]).map(|_| ())
}

/// Run git in `repo_path` and return its stdout
pub fn git(repo_path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .output()?;
    if !output.status.success() {
        return Err(StatusCacheError::operation(
            "git",
            repo_path,
            BackendError::new(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Paths git reports in `git status --porcelain`, keyed by their two-letter code
pub fn porcelain(repo_path: &Path) -> Result<Vec<(String, String)>> {
    Ok(git(repo_path, &["status", "--porcelain", "-uall"])?
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| (line[..2].to_string(), line[3..].to_string()))
        .collect())
}
