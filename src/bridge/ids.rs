//! Local-to-remote id translation for messages the bridge posted.
//!
//! The gateway refers to relayed messages by their provisional local id; the remote
//! platform assigns its own. The map is shared between the send path and whoever holds the
//! bridge, so it is guarded by a mutex and bounded in both size and age.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

#[derive(Debug)]
struct Entry {
    remote_id: String,
    inserted: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Insertion order, oldest first. May hold keys already replaced or evicted.
    order: VecDeque<(String, Instant)>,
}

impl Inner {
    fn evict(&mut self, now: Instant, capacity: usize, retention: Duration) {
        while let Some((key, inserted)) = self.order.front() {
            let expired = now.duration_since(*inserted) > retention;
            let over = self.entries.len() > capacity;

            if !expired && !over {
                break;
            }

            // Only drop the entry if this queue slot is still its latest insertion.
            if self.entries.get(key).is_some_and(|e| e.inserted == *inserted) {
                self.entries.remove(key);
            }

            self.order.pop_front();
        }
    }
}

/// Bounded map from local message ids to remote message ids.
///
/// This is trivially cloneable; clones share the same table.
#[derive(Debug, Clone)]
pub struct IdMap {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    retention: Duration,
}

impl IdMap {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity: capacity.max(1),
            retention,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the table inconsistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remembers that `local_id` was posted as `remote_id`.
    pub fn insert(&self, local_id: &str, remote_id: &str) {
        let now = Instant::now();
        let mut inner = self.lock();

        inner.entries.insert(
            local_id.to_string(),
            Entry {
                remote_id: remote_id.to_string(),
                inserted: now,
            },
        );
        inner.order.push_back((local_id.to_string(), now));
        inner.evict(now, self.capacity, self.retention);
    }

    /// The remote id recorded for `local_id`, if still retained.
    pub fn get(&self, local_id: &str) -> Option<String> {
        let now = Instant::now();
        let inner = self.lock();

        inner
            .entries
            .get(local_id)
            .filter(|e| now.duration_since(e.inserted) <= self.retention)
            .map(|e| e.remote_id.clone())
    }

    /// Translates `id` through the map, falling back to `id` itself.
    pub fn resolve(&self, id: &str) -> String {
        self.get(id).unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Tests.
