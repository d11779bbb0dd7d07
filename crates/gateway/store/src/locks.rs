//! Per-path write serialization.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map from key to mutex, with stale-entry reaping.
///
/// Mutations on the same entity path serialize through one mutex; entries
/// nobody holds are swept once the map grows past the threshold.
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    reap_threshold: usize,
}

impl KeyedLocks {
    pub fn new(reap_threshold: usize) -> Self {
        Self {
            locks: DashMap::new(),
            reap_threshold: reap_threshold.max(1),
        }
    }

    /// Acquire the lock for a key, creating it on first use.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        if self.locks.len() > self.reap_threshold {
            self.reap();
        }

        lock.lock_owned().await
    }

    /// Drop entries with no outstanding guards or waiters.
    fn reap(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
