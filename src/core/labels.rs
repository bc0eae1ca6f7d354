//! Display labels: revision, author, date and mime type per file.
//!
//! Lookups never block. A missing or stale label is answered with the best
//! value at hand and queued for a background worker, which queries the backend
//! and writes the whole batch with one timestamp.

use crate::core::error::{Result, StatusCacheError};
use crate::core::file_ref::FileRef;
use crate::core::listeners::{ListenerId, StatusChangeEvent};
use crate::core::scheduler::DEFAULT_DEBOUNCE;
use crate::core::status::FileStatus;
use crate::core::store::StatusStore;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_LABEL_VALIDITY: Duration = Duration::from_secs(20);
pub const DEFAULT_LABEL_CAPACITY: usize = 100;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelInfo {
    pub revision: String,
    /// `None` until a mime classification was requested
    pub mime: Option<String>,
    pub sticky: String,
    pub last_author: String,
    pub last_date: String,
    pub last_revision: String,
    timestamp: Option<Instant>,
    picked_up: bool,
}

impl LabelInfo {
    /// All-empty placeholder handed out while the real label is computed
    pub fn fake() -> Self {
        Self::default()
    }

    pub fn is_fake(&self) -> bool {
        self.timestamp.is_none()
    }

    pub fn mime(&self) -> &str {
        self.mime.as_deref().unwrap_or("")
    }

    pub fn is_binary(&self) -> bool {
        self.mime
            .as_deref()
            .is_some_and(|mime| !mime.is_empty() && !mime.starts_with("text/"))
    }

    /// A fresh label is valid on its first pick-up whatever its age, and
    /// afterwards only inside the validity window
    fn check_valid(&mut self, validity: Duration) -> bool {
        let Some(timestamp) = self.timestamp else {
            return false;
        };
        if !self.picked_up {
            self.picked_up = true;
            return true;
        }
        timestamp.elapsed() < validity
    }
}

/// Resident labels in least-recently-used order
#[derive(Debug, Default)]
struct LabelLru {
    entries: HashMap<FileRef, (u64, LabelInfo)>,
    order: BTreeMap<u64, FileRef>,
    clock: u64,
}

impl LabelLru {
    fn get_mut(&mut self, file: &FileRef) -> Option<&mut LabelInfo> {
        self.clock += 1;
        let clock = self.clock;
        let (stamp, info) = self.entries.get_mut(file)?;
        self.order.remove(stamp);
        self.order.insert(clock, file.clone());
        *stamp = clock;
        Some(info)
    }

    fn insert(&mut self, file: FileRef, info: LabelInfo) {
        self.clock += 1;
        if let Some((stamp, _)) = self.entries.remove(&file) {
            self.order.remove(&stamp);
        }
        self.order.insert(self.clock, file.clone());
        self.entries.insert(file, (self.clock, info));
    }

    fn remove(&mut self, file: &FileRef) {
        if let Some((stamp, _)) = self.entries.remove(file) {
            self.order.remove(&stamp);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn trim(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            let Some((_, file)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&file);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Default)]
struct PendingLabels {
    /// file -> mime classification requested
    files: HashMap<FileRef, bool>,
    deadline: Option<Instant>,
    running: bool,
    shutdown: bool,
}

impl PendingLabels {
    fn is_idle(&self) -> bool {
        self.files.is_empty() && self.deadline.is_none() && !self.running
    }
}

struct LabelShared {
    resident: Mutex<LabelLru>,
    pending: Mutex<PendingLabels>,
    wake: Condvar,
    idle: Condvar,
    validity: Duration,
    capacity: usize,
    debounce: Duration,
}

impl LabelShared {
    fn lookup(&self, file: &FileRef, needs_mime: bool, immediate: bool) -> LabelInfo {
        let (label, fresh) = {
            let mut resident = self.resident.lock();
            match resident.get_mut(file) {
                Some(info) => {
                    let valid = info.check_valid(self.validity);
                    let fresh = valid && (!needs_mime || info.mime.is_some());
                    (info.clone(), fresh)
                }
                None => (LabelInfo::fake(), false),
            }
        };
        if !fresh {
            self.schedule(file, needs_mime, immediate);
        }
        label
    }

    fn schedule(&self, file: &FileRef, needs_mime: bool, immediate: bool) {
        let mut pending = self.pending.lock();
        let wanted = pending.files.entry(file.clone()).or_insert(false);
        *wanted |= needs_mime;

        let now = Instant::now();
        let due = if immediate { now } else { now + self.debounce };
        let rearm = match pending.deadline {
            None => !pending.running,
            Some(deadline) => due < deadline,
        };
        if rearm {
            pending.deadline = Some(due);
            self.wake.notify_one();
        }
    }
}

/// Background-populated cache of [`LabelInfo`]
pub struct LabelCache {
    shared: Arc<LabelShared>,
    store: Arc<StatusStore>,
    listener: ListenerId,
    worker: Option<JoinHandle<()>>,
}

impl LabelCache {
    pub fn new(store: Arc<StatusStore>) -> Result<Self> {
        Self::with_options(store, DEFAULT_DEBOUNCE, DEFAULT_LABEL_VALIDITY, DEFAULT_LABEL_CAPACITY)
    }

    pub fn with_options(
        store: Arc<StatusStore>,
        debounce: Duration,
        validity: Duration,
        capacity: usize,
    ) -> Result<Self> {
        let shared = Arc::new(LabelShared {
            resident: Mutex::new(LabelLru::default()),
            pending: Mutex::new(PendingLabels::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            validity,
            capacity,
            debounce,
        });

        let weak: Weak<LabelShared> = Arc::downgrade(&shared);
        let listener = store.subscribe(Arc::new(move |event: &StatusChangeEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.resident.lock().remove(&event.file);
            }
        }));

        let worker_shared = Arc::clone(&shared);
        let worker_store = Arc::clone(&store);
        let worker = std::thread::Builder::new()
            .name("label-refresh".to_string())
            .spawn(move || run_worker(&worker_shared, &worker_store))
            .map_err(|source| {
                store.unsubscribe(listener);
                StatusCacheError::WorkerSpawnFailed { source }
            })?;

        Ok(Self {
            shared,
            store,
            listener,
            worker: Some(worker),
        })
    }

    /// Best known label for `file`; missing or stale labels are recomputed
    /// after the debounce window
    pub fn get_label_info(&self, file: &FileRef, needs_mime: bool) -> LabelInfo {
        self.shared.lookup(file, needs_mime, false)
    }

    /// Like [`get_label_info`](Self::get_label_info) but wakes the worker
    /// right away, for callers rendering on screen
    pub fn get_label_info_now(&self, file: &FileRef, needs_mime: bool) -> LabelInfo {
        self.shared.lookup(file, needs_mime, true)
    }

    pub fn flush(&self, files: &[FileRef]) {
        let mut resident = self.shared.resident.lock();
        for file in files {
            resident.remove(file);
        }
    }

    pub fn flush_all(&self) {
        self.shared.resident.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.shared.resident.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until no label is pending or being computed; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let until = Instant::now() + timeout;
        let mut pending = self.shared.pending.lock();
        while !pending.is_idle() {
            if self.shared.idle.wait_until(&mut pending, until).timed_out() {
                return pending.is_idle();
            }
        }
        true
    }
}

impl Drop for LabelCache {
    fn drop(&mut self) {
        self.store.unsubscribe(self.listener);
        self.shared.pending.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Label worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for LabelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelCache")
            .field("resident", &self.len())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

fn run_worker(shared: &LabelShared, store: &StatusStore) {
    let mut pending = shared.pending.lock();
    loop {
        if pending.shutdown {
            return;
        }
        let deadline = pending.deadline;
        match deadline {
            None => {
                shared.wake.wait(&mut pending);
                continue;
            }
            Some(deadline) if Instant::now() < deadline => {
                shared.wake.wait_until(&mut pending, deadline);
                continue;
            }
            Some(_) => {}
        }

        pending.deadline = None;
        pending.running = true;
        while !pending.files.is_empty() && !pending.shutdown {
            let batch: Vec<(FileRef, bool)> = pending.files.drain().collect();
            parking_lot::MutexGuard::unlocked(&mut pending, || {
                let computed: Vec<(FileRef, LabelInfo)> = batch
                    .into_iter()
                    .map(|(file, needs_mime)| {
                        let label = compute_label(store, &file, needs_mime);
                        (file, label)
                    })
                    .collect();
                write_batch(shared, computed);
            });
        }
        pending.running = false;
        shared.idle.notify_all();
    }
}

/// Apply one pass worth of labels under a single timestamp, then trim
fn write_batch(shared: &LabelShared, labels: Vec<(FileRef, LabelInfo)>) {
    let stamp = Instant::now();
    let mut resident = shared.resident.lock();
    log::debug!("writing {} labels", labels.len());
    for (file, mut label) in labels {
        label.timestamp = Some(stamp);
        label.picked_up = false;
        resident.insert(file, label);
    }
    resident.trim(shared.capacity);
}

fn compute_label(store: &StatusStore, file: &FileRef, needs_mime: bool) -> LabelInfo {
    let backend = store.backend();
    let status = store.get_status(file).status();
    let parent_ignored = file
        .parent()
        .is_some_and(|parent| backend.is_ignored(parent.path()));
    if matches!(status, FileStatus::Excluded | FileStatus::NotManaged) || parent_ignored {
        return LabelInfo::fake();
    }

    let mut label = LabelInfo::fake();
    if status != FileStatus::NewLocally {
        match backend.info(file.path()) {
            Ok(info) => {
                label.revision = info.revision.unwrap_or_default();
                label.last_revision = info.last_changed_revision.unwrap_or_default();
                label.last_author = info.last_author.unwrap_or_default();
                label.sticky = info.sticky.unwrap_or_default();
                label.last_date = info
                    .last_changed
                    .map(|date| date.format(DATE_FORMAT).to_string())
                    .unwrap_or_default();
            }
            Err(e) => log::warn!("Could not read revision info of {file}: {e}"),
        }
    }

    if needs_mime {
        let mime = if status == FileStatus::NewLocally || file.is_dir() {
            String::new()
        } else {
            match backend.mime_type(file.path()) {
                Ok(mime) => mime.unwrap_or_default(),
                Err(e) => {
                    log::warn!("Could not classify {file}: {e}");
                    String::new()
                }
            }
        };
        label.mime = Some(mime);
    }
    label
}
