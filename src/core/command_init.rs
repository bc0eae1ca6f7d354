//! Shared setup for the command-line front end.
//!
//! [`CommandInit`] locates the working copy around a directory, loads the
//! configuration and wires store, scheduler and interceptor together.
//! [`CommandContext::finish`] drains background work and persists the
//! snapshot when enabled.

use crate::core::backend::VcsBackend;
use crate::core::config::CacheConfig;
use crate::core::error::{Result, StatusCacheError};
use crate::core::file_ref::FileRef;
use crate::core::git::GitBackend;
use crate::core::interceptor::{FilesystemInterceptor, InterceptorConfig};
use crate::core::labels::LabelCache;
use crate::core::persist;
use crate::core::scheduler::{NoDelay, RefreshScheduler};
use crate::core::store::StatusStore;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a command needs, bound to one working copy
pub struct CommandContext {
    pub root: FileRef,
    pub config: CacheConfig,
    pub store: Arc<StatusStore>,
    pub scheduler: Arc<RefreshScheduler>,
    pub interceptor: FilesystemInterceptor,
}

pub struct CommandInit;

impl CommandInit {
    /// Context for the working copy around the current directory
    pub fn initialize() -> Result<CommandContext> {
        let current_dir = env::current_dir()?;
        let config = CacheConfig::load_or_default().unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {e}");
            CacheConfig::default()
        });
        Self::initialize_at(&current_dir, config)
    }

    pub fn initialize_at(dir: &Path, config: CacheConfig) -> Result<CommandContext> {
        let backend: Arc<dyn VcsBackend> = Arc::new(GitBackend::new());
        let root = backend
            .repository_root(dir)
            .map(FileRef::new)
            .ok_or(StatusCacheError::NotInWorkingCopy)?;
        log::debug!("Working copy root: {root}");

        let store = Arc::new(
            StatusStore::new(backend).with_size_warning_threshold(config.cache_size_warning_threshold),
        );
        if config.persist_snapshots {
            match persist::load_snapshot(&store, &root) {
                Ok(true) => store.clean_up(),
                Ok(false) => {}
                Err(e) => log::warn!("Ignoring unreadable snapshot: {e}"),
            }
        }
        store.compute_index();

        let scheduler = Arc::new(RefreshScheduler::with_options(
            Arc::clone(&store),
            config.debounce(),
            Arc::new(NoDelay),
        )?);
        let interceptor = FilesystemInterceptor::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            InterceptorConfig::from(&config),
        );

        Ok(CommandContext {
            root,
            config,
            store,
            scheduler,
            interceptor,
        })
    }
}

impl CommandContext {
    /// Resolve a command-line path against the current directory
    pub fn resolve(&self, arg: &str) -> FileRef {
        FileRef::new(arg)
    }

    /// Resolve every argument, defaulting to the working-copy root
    pub fn resolve_all(&self, args: &[String]) -> Vec<FileRef> {
        if args.is_empty() {
            vec![self.root.clone()]
        } else {
            args.iter().map(|arg| self.resolve(arg)).collect()
        }
    }

    /// Path relative to the working-copy root, for display
    pub fn display_path(&self, file: &FileRef) -> String {
        match file.path().strip_prefix(self.root.path()) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => file.to_string(),
        }
    }

    pub fn label_cache(&self) -> Result<LabelCache> {
        LabelCache::with_options(
            Arc::clone(&self.store),
            self.config.debounce(),
            self.config.label_validity(),
            self.config.label_capacity,
        )
    }

    /// Wait for pending refreshes, then persist the snapshot if enabled
    pub fn finish(self) -> Result<()> {
        if !self.scheduler.wait_idle(DRAIN_TIMEOUT) {
            log::warn!("Background refresh still running after {DRAIN_TIMEOUT:?}");
        }
        if self.config.persist_snapshots {
            persist::save_snapshot(&self.store, &self.root)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("root", &self.root)
            .field("store", &self.store)
            .finish()
    }
}
