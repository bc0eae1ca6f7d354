//! Status change notifications.

use crate::core::file_ref::FileRef;
use crate::core::status::StatusInfo;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One status transition observed by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChangeEvent {
    pub file: FileRef,
    pub old: Option<StatusInfo>,
    pub new: StatusInfo,
}

/// Receiver of status change events.
///
/// Called on whichever thread performed the refresh, never while the store
/// holds a lock.
pub trait StatusListener: Send + Sync {
    fn status_changed(&self, event: &StatusChangeEvent);
}

impl<F> StatusListener for F
where
    F: Fn(&StatusChangeEvent) + Send + Sync,
{
    fn status_changed(&self, event: &StatusChangeEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn StatusListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn StatusListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire(&self, event: &StatusChangeEvent) {
        // snapshot so listeners may (un)subscribe from inside the callback
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.status_changed(event);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
