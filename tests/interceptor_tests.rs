use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wc_status_cache::core::interceptor::TransferStrategy;
use wc_status_cache::core::status::{NodeKind, TextStatus};
use wc_status_cache::{
    FileRef, FileStatus, FilesystemInterceptor, GitBackend, InterceptorConfig, NoDelay,
    RefreshScheduler, StatusCacheError, StatusStore, VcsBackend,
};

mod common;
use common::{fake_backend::FakeBackend, repository::*};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    store: Arc<StatusStore>,
    scheduler: Arc<RefreshScheduler>,
    interceptor: FilesystemInterceptor,
}

impl Harness {
    fn new(backend: Arc<dyn VcsBackend>, config: InterceptorConfig) -> anyhow::Result<Self> {
        let store = Arc::new(StatusStore::new(backend));
        let scheduler = Arc::new(RefreshScheduler::with_options(
            Arc::clone(&store),
            Duration::from_millis(10),
            Arc::new(NoDelay),
        )?);
        let interceptor =
            FilesystemInterceptor::new(Arc::clone(&store), Arc::clone(&scheduler), config);
        Ok(Self {
            store,
            scheduler,
            interceptor,
        })
    }

    fn settle(&self) {
        assert!(self.scheduler.wait_idle(IDLE_TIMEOUT));
    }

    fn status(&self, file: &FileRef) -> FileStatus {
        self.store.get_status(file).status()
    }
}

fn quick_retry() -> InterceptorConfig {
    InterceptorConfig {
        lock_retry_backoff: Duration::from_millis(1),
        ..InterceptorConfig::default()
    }
}

fn fake_setup(config: InterceptorConfig) -> anyhow::Result<(TempDir, FileRef, Arc<FakeBackend>, Harness)> {
    let temp = TempDir::new()?;
    let root = FileRef::new(temp.path().canonicalize()?);
    let backend = Arc::new(FakeBackend::new(root.path()));
    let harness = Harness::new(backend.clone(), config)?;
    Ok((temp, root, backend, harness))
}

fn write(file: &FileRef) -> anyhow::Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent.path())?;
    }
    fs::write(file.path(), "content")?;
    Ok(())
}

#[cfg(test)]
mod interceptor_tests {
    use super::*;

    #[test]
    fn test_move_retries_while_working_copy_locked() -> anyhow::Result<()> {
        let (_temp, root, backend, h) = fake_setup(quick_retry())?;
        let from = root.join("a.txt");
        let to = root.join("b.txt");
        write(&from)?;
        backend.fail("move", "Unable to create '.git/index.lock': File exists", 2);

        assert!(h.interceptor.before_move(&from, &to));
        assert_eq!(h.interceptor.strategy(&from, &to), TransferStrategy::Backend);
        h.interceptor.do_move(&from, &to)?;
        h.interceptor.after_move(&from, &to);
        h.settle();

        assert_eq!(backend.calls("move"), 3);
        assert!(to.exists());
        assert_eq!(h.status(&to), FileStatus::Added);
        assert_eq!(h.status(&from), FileStatus::RemovedLocally);
        Ok(())
    }

    #[test]
    fn test_failed_move_surfaces_error_and_schedules_refresh() -> anyhow::Result<()> {
        let (_temp, root, backend, h) = fake_setup(quick_retry())?;
        let from = root.join("a.txt");
        let to = root.join("b.txt");
        write(&from)?;
        backend.fail("move", "svn: E155004: Working copy locked", 100);
        let before = backend.queries_for(from.path());

        let err = h.interceptor.do_move(&from, &to).unwrap_err();
        assert!(matches!(
            err,
            StatusCacheError::Operation {
                operation: "move",
                ..
            }
        ));
        assert!(err.backend_cause().is_some_and(|cause| cause.is_working_copy_locked()));
        assert_eq!(backend.calls("move"), 6);

        h.settle();
        assert!(backend.queries_for(from.path()) > before);
        assert!(from.exists());
        Ok(())
    }

    #[test]
    fn test_added_source_is_reverted_then_moved() -> anyhow::Result<()> {
        let (_temp, root, backend, h) = fake_setup(quick_retry())?;
        let from = root.join("fresh.txt");
        let to = root.join("moved/fresh.txt");
        write(&from)?;
        fs::create_dir_all(root.join("moved").path())?;
        backend.set(from.path(), NodeKind::File, TextStatus::Added);

        assert!(h.interceptor.before_move(&from, &to));
        assert_eq!(
            h.interceptor.strategy(&from, &to),
            TransferStrategy::RevertAndTransfer
        );
        h.interceptor.do_move(&from, &to)?;
        h.interceptor.after_move(&from, &to);
        h.settle();

        assert_eq!(backend.calls("revert"), 1);
        assert_eq!(backend.calls("move"), 0);
        assert!(!from.exists());
        assert_eq!(h.status(&to), FileStatus::Added);
        Ok(())
    }

    #[test]
    fn test_unversioned_source_moves_on_disk_only() -> anyhow::Result<()> {
        let (_temp, root, backend, h) = fake_setup(quick_retry())?;
        let from = root.join("scratch.txt");
        let to = root.join("dest/scratch.txt");
        write(&from)?;
        fs::create_dir_all(root.join("dest").path())?;
        backend.set(from.path(), NodeKind::File, TextStatus::Unversioned);

        assert!(h.interceptor.before_move(&from, &to));
        assert_eq!(h.interceptor.strategy(&from, &to), TransferStrategy::Filesystem);
        h.interceptor.do_move(&from, &to)?;
        h.interceptor.after_move(&from, &to);
        h.settle();

        assert_eq!(backend.calls("move"), 0);
        assert!(to.exists());
        assert!(!from.exists());
        Ok(())
    }

    #[test]
    fn test_metadata_and_unmanaged_targets_are_not_intercepted() -> anyhow::Result<()> {
        let (_temp, root, _backend, h) = fake_setup(quick_retry())?;
        let from = root.join("a.txt");
        write(&from)?;
        let outside = TempDir::new()?;

        assert!(!h.interceptor.before_move(&from, &root.join(".vcs/a.txt")));
        assert!(!h
            .interceptor
            .before_copy(&from, &FileRef::new(outside.path().join("a.txt"))));
        assert!(!h.interceptor.before_delete(&root.join(".vcs/entries")));
        Ok(())
    }

    #[test]
    fn test_external_delete_is_repaired_only_when_enabled() -> anyhow::Result<()> {
        for repair in [false, true] {
            let config = InterceptorConfig {
                auto_repair_external_deletes: repair,
                ..quick_retry()
            };
            let (_temp, root, backend, h) = fake_setup(config)?;
            let file = root.join("tracked.txt");
            write(&file)?;
            h.store.get_status(&file);

            fs::remove_file(file.path())?;
            backend.set(file.path(), NodeKind::File, TextStatus::Missing);
            h.interceptor.after_delete(&file);
            h.settle();

            let expected = if repair {
                FileStatus::RemovedLocally
            } else {
                FileStatus::DeletedLocally
            };
            assert_eq!(backend.calls("remove"), usize::from(repair));
            assert_eq!(h.status(&file), expected);
        }
        Ok(())
    }

    #[test]
    fn test_delete_schedules_removal_and_refreshes_children() -> anyhow::Result<()> {
        let (_temp, root, backend, h) = fake_setup(quick_retry())?;
        let dir = root.join("lib");
        let child = dir.join("mod.txt");
        write(&child)?;
        backend.set(child.path(), NodeKind::File, TextStatus::Modified);
        assert_eq!(h.status(&child), FileStatus::Modified);

        assert!(h.interceptor.before_delete(&dir));
        h.interceptor.do_delete(&dir)?;
        assert!(!dir.exists());
        backend.set(child.path(), NodeKind::File, TextStatus::Deleted);
        h.interceptor.after_delete(&dir);
        h.settle();

        assert_eq!(backend.calls("remove"), 1);
        assert_eq!(h.status(&dir), FileStatus::RemovedLocally);
        assert_eq!(
            h.store.get_cached_status(&child).map(|i| i.status()),
            Some(FileStatus::RemovedLocally)
        );
        Ok(())
    }

    #[test]
    fn test_cross_repository_move_tracks_destination() -> anyhow::Result<()> {
        let source = setup_test_repo()?;
        create_file(source.path(), "docs/guide.txt", "guide\n")?;
        git_add(source.path(), ".")?;
        git_commit(source.path(), "Add guide")?;
        let target = setup_test_repo_with_initial_commit()?;

        let h = Harness::new(Arc::new(GitBackend::new()), quick_retry())?;
        let from = FileRef::new(source.join("docs/guide.txt"));
        let to = FileRef::new(target.join("guide.txt"));
        assert_eq!(h.status(&from), FileStatus::UpToDate);

        assert!(h.interceptor.before_move(&from, &to));
        assert_eq!(
            h.interceptor.strategy(&from, &to),
            TransferStrategy::CrossRepository
        );
        h.interceptor.do_move(&from, &to)?;
        h.interceptor.after_move(&from, &to);
        h.settle();

        let moved = h.status(&to);
        assert!(moved.is_versioned(), "destination is {moved}");
        assert_eq!(moved, FileStatus::Added);
        assert!(!from.exists());
        assert_eq!(h.status(&from), FileStatus::RemovedLocally);
        assert!(porcelain(target.path())?.contains(&("A ".to_string(), "guide.txt".to_string())));
        Ok(())
    }

    #[test]
    fn test_move_within_repository_uses_git_mv() -> anyhow::Result<()> {
        let repo = setup_test_repo_with_initial_commit()?;
        let h = Harness::new(Arc::new(GitBackend::new()), quick_retry())?;
        let from = FileRef::new(repo.join("initial.txt"));
        let to = FileRef::new(repo.join("renamed.txt"));

        assert_eq!(h.interceptor.strategy(&from, &to), TransferStrategy::Backend);
        h.interceptor.do_move(&from, &to)?;
        h.interceptor.after_move(&from, &to);
        h.settle();

        assert_eq!(h.status(&to), FileStatus::Added);
        assert_eq!(h.status(&from), FileStatus::RemovedLocally);
        Ok(())
    }

    #[test]
    fn test_recreate_under_removed_directory() -> anyhow::Result<()> {
        let repo = setup_test_repo()?;
        create_file(repo.path(), "pkg/old.txt", "old\n")?;
        git_add(repo.path(), ".")?;
        git_commit(repo.path(), "Add pkg")?;

        let h = Harness::new(Arc::new(GitBackend::new()), quick_retry())?;
        let dir = FileRef::new(repo.join("pkg"));
        let child = FileRef::new(repo.join("pkg/new.txt"));
        assert_eq!(h.status(&dir), FileStatus::UpToDate);

        assert!(h.interceptor.before_delete(&dir));
        h.interceptor.do_delete(&dir)?;
        h.interceptor.after_delete(&dir);
        h.settle();
        assert_eq!(h.store.refresh(&dir, None).status(), FileStatus::RemovedLocally);

        assert!(h.interceptor.before_create(&child));
        h.interceptor.do_create(&child, false)?;
        h.interceptor.after_create(&child);
        h.settle();

        assert_ne!(h.status(&dir), FileStatus::RemovedLocally);
        let created = h.status(&child);
        assert_ne!(created, FileStatus::Unknown);
        assert_eq!(created, FileStatus::NewLocally);
        Ok(())
    }

    #[test]
    fn test_recreate_restores_known_children() -> anyhow::Result<()> {
        let repo = setup_test_repo()?;
        create_file(repo.path(), "pkg/old.txt", "old\n")?;
        git_add(repo.path(), ".")?;
        git_commit(repo.path(), "Add pkg")?;
        create_file(repo.path(), "pkg/old.txt", "edited\n")?;

        let h = Harness::new(Arc::new(GitBackend::new()), quick_retry())?;
        let dir = FileRef::new(repo.join("pkg"));
        let old = FileRef::new(repo.join("pkg/old.txt"));
        let created = FileRef::new(repo.join("pkg/new.txt"));
        assert_eq!(h.status(&dir), FileStatus::UpToDate);
        assert_eq!(h.status(&old), FileStatus::Modified);

        h.interceptor.do_delete(&dir)?;
        h.interceptor.after_delete(&dir);
        h.settle();
        assert_eq!(
            h.store.get_cached_status(&old).map(|i| i.status()),
            Some(FileStatus::RemovedLocally)
        );

        assert!(h.interceptor.before_create(&created));
        h.interceptor.do_create(&created, false)?;
        h.interceptor.after_create(&created);
        h.settle();

        assert!(old.exists());
        assert_ne!(
            h.store.get_cached_status(&old).map(|i| i.status()),
            Some(FileStatus::RemovedLocally)
        );
        assert_eq!(h.status(&old), FileStatus::UpToDate);
        Ok(())
    }

    #[test]
    fn test_failed_create_heals_reverted_ancestor() -> anyhow::Result<()> {
        let (_temp, root, backend, h) = fake_setup(quick_retry())?;
        let dir = root.join("pkg");
        write(&dir.join("sub"))?;
        backend.set(dir.path(), NodeKind::Dir, TextStatus::Deleted);
        assert_eq!(h.store.refresh(&dir, None).status(), FileStatus::RemovedLocally);

        // `sub` is a regular file, so nothing can be created below it
        let target = dir.join("sub/new.txt");
        assert!(h.interceptor.before_create(&target));
        let err = h.interceptor.do_create(&target, false).unwrap_err();
        assert!(matches!(
            err,
            StatusCacheError::Operation {
                operation: "create",
                ..
            }
        ));
        h.settle();

        assert_eq!(backend.calls("revert"), 1);
        assert_eq!(
            h.store.get_cached_status(&dir).map(|i| i.status()),
            Some(FileStatus::UpToDate)
        );
        Ok(())
    }

    #[test]
    fn test_failed_delete_leaves_file_to_external_repair() -> anyhow::Result<()> {
        let config = InterceptorConfig {
            auto_repair_external_deletes: true,
            ..quick_retry()
        };
        let (_temp, root, backend, h) = fake_setup(config)?;
        let file = root.join("tracked.txt");
        write(&file)?;
        backend.fail("remove", "svn: E200009: Could not remove", 1);

        assert!(h.interceptor.do_delete(&file).is_err());
        assert!(file.exists());
        h.settle();

        // a later delete behind our back is treated as external again
        fs::remove_file(file.path())?;
        backend.set(file.path(), NodeKind::File, TextStatus::Missing);
        h.interceptor.after_delete(&file);
        h.settle();

        assert_eq!(backend.calls("remove"), 2);
        assert_eq!(h.status(&file), FileStatus::RemovedLocally);
        Ok(())
    }

    #[test]
    fn test_copy_within_repository_adds_destination() -> anyhow::Result<()> {
        let repo = setup_test_repo_with_initial_commit()?;
        let h = Harness::new(Arc::new(GitBackend::new()), quick_retry())?;
        let from = FileRef::new(repo.join("initial.txt"));
        let to = FileRef::new(repo.join("copy.txt"));

        assert!(h.interceptor.before_copy(&from, &to));
        h.interceptor.do_copy(&from, &to)?;
        h.interceptor.after_copy(&from, &to);
        h.settle();

        assert_eq!(h.status(&to), FileStatus::Added);
        assert_eq!(h.status(&from), FileStatus::UpToDate);
        assert_eq!(fs::read_to_string(to.path())?, "initial content\n");
        Ok(())
    }
}
