//! Fan-out of session events to registered observers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use keeper_types::WatchedEvent;
use parking_lot::Mutex;
use tracing::warn;

/// Observer of every session event.
pub type GlobalWatcher = Arc<dyn Fn(&WatchedEvent) + Send + Sync + 'static>;

/// Token returned by [`GlobalWatcherSet::add`], used to remove the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

/// Set of observers invoked on every session-state event.
///
/// Dispatch iterates a snapshot, so observers may add or remove watchers
/// (themselves included) while being called.
#[derive(Clone, Default)]
pub struct GlobalWatcherSet {
    watchers: Arc<Mutex<BTreeMap<WatcherId, GlobalWatcher>>>,
    next_id: Arc<AtomicU64>,
}

impl GlobalWatcherSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn add(&self, watcher: impl Fn(&WatchedEvent) + Send + Sync + 'static) -> WatcherId {
        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watchers.lock().insert(id, Arc::new(watcher));
        id
    }

    /// Remove an observer. Unknown ids are logged and ignored.
    pub fn remove(&self, id: WatcherId) -> bool {
        let removed = self.watchers.lock().remove(&id).is_some();
        if !removed {
            warn!(watcher = id.0, "global watcher is not registered");
        }
        removed
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.watchers.lock().len()
    }

    /// Returns true if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every observer registered when dispatch starts.
    pub fn dispatch(&self, event: &WatchedEvent) {
        let snapshot: Vec<GlobalWatcher> = self.watchers.lock().values().cloned().collect();
        for watcher in snapshot {
            watcher(event);
        }
    }
}
