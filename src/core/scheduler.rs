//! Debounced, coalescing background refresh.
//!
//! Requests land in a pending set. A single worker thread wakes once the
//! debounce window after the first request has passed, then drains the set one
//! file at a time through [`StatusStore::refresh`]. Anything requested while a
//! pass is running joins that pass.

use crate::core::error::{Result, StatusCacheError};
use crate::core::file_ref::FileRef;
use crate::core::store::StatusStore;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// External back-pressure: while delayed, passes are postponed
pub trait DelayPolicy: Send + Sync {
    fn is_delayed(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayPolicy for NoDelay {
    fn is_delayed(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct Pending {
    files: HashSet<FileRef>,
    recursive: HashSet<FileRef>,
    deadline: Option<Instant>,
    draining: bool,
    shutdown: bool,
}

impl Pending {
    fn is_idle(&self) -> bool {
        self.files.is_empty() && self.recursive.is_empty() && self.deadline.is_none() && !self.draining
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<Pending>,
    wake: Condvar,
    idle: Condvar,
}

pub struct RefreshScheduler {
    shared: Arc<Shared>,
    debounce: Duration,
    worker: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn new(store: Arc<StatusStore>) -> Result<Self> {
        Self::with_options(store, DEFAULT_DEBOUNCE, Arc::new(NoDelay))
    }

    pub fn with_options(
        store: Arc<StatusStore>,
        debounce: Duration,
        delay: Arc<dyn DelayPolicy>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("status-refresh".to_string())
            .spawn(move || run_worker(&worker_shared, &store, debounce, delay.as_ref()))
            .map_err(|source| StatusCacheError::WorkerSpawnFailed { source })?;

        Ok(Self {
            shared,
            debounce,
            worker: Some(worker),
        })
    }

    /// Queue `files` for refresh; with `recursive` every managed path under
    /// each of them is refreshed too.
    ///
    /// Never blocks on the backend.
    pub fn refresh_async(&self, files: &[FileRef], recursive: bool) {
        if files.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        let target = if recursive {
            &mut state.recursive
        } else {
            &mut state.files
        };
        target.extend(files.iter().cloned());

        if state.deadline.is_none() && !state.draining {
            state.deadline = Some(Instant::now() + self.debounce);
            self.shared.wake.notify_one();
        }
    }

    /// Number of files waiting for the next pass
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.files.len() + state.recursive.len()
    }

    /// Block until nothing is pending or running; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let until = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if self.shared.idle.wait_until(&mut state, until).timed_out() {
                return state.is_idle();
            }
        }
        true
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Status refresh worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("debounce", &self.debounce)
            .field("pending", &self.pending())
            .finish()
    }
}

fn run_worker(shared: &Shared, store: &StatusStore, debounce: Duration, delay: &dyn DelayPolicy) {
    let mut state = shared.state.lock();
    loop {
        // sleep until the debounce deadline of the first queued request
        if state.shutdown {
            return;
        }
        let deadline = state.deadline;
        match deadline {
            None => {
                shared.wake.wait(&mut state);
                continue;
            }
            Some(deadline) if Instant::now() < deadline => {
                shared.wake.wait_until(&mut state, deadline);
                continue;
            }
            Some(_) => {}
        }

        if delay.is_delayed() {
            log::debug!("refresh pass postponed");
            state.deadline = Some(Instant::now() + debounce);
            continue;
        }

        state.deadline = None;
        state.draining = true;
        let refreshed = drain(&mut state, store);
        state.draining = false;
        log::debug!("refresh pass done: {refreshed} files");
        shared.idle.notify_all();
    }
}

fn drain(state: &mut MutexGuard<'_, Pending>, store: &StatusStore) -> usize {
    let mut refreshed = 0;
    loop {
        if !state.recursive.is_empty() {
            let roots: Vec<FileRef> = state.recursive.drain().collect();
            let expanded = MutexGuard::unlocked(state, || {
                roots
                    .iter()
                    .flat_map(|root| list_managed_recursively(store, root))
                    .collect::<Vec<_>>()
            });
            state.files.extend(expanded);
        }

        let Some(file) = state.files.iter().next().cloned() else {
            return refreshed;
        };
        state.files.remove(&file);
        MutexGuard::unlocked(state, || {
            store.refresh(&file, None);
        });
        refreshed += 1;
    }
}

/// `root` plus every managed path beneath it, metadata excluded
fn list_managed_recursively(store: &StatusStore, root: &FileRef) -> Vec<FileRef> {
    let backend = store.backend();
    let mut files = vec![root.clone()];
    if !root.is_dir() {
        return files;
    }
    let walker = walkdir::WalkDir::new(root.path())
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !backend.is_metadata(entry.path()));
    for entry in walker.filter_map(|entry| entry.ok()) {
        if backend.repository_root(entry.path()).is_some() {
            files.push(FileRef::new(entry.path()));
        }
    }
    files
}
