//! Per-target serialization of cycles.
//!
//! Two cycles touching the same target never interleave. Cycles on
//! different targets run freely.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Async locks keyed by target.
#[derive(Default)]
pub struct TargetLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every target, in sorted order so that overlapping sets cannot deadlock.
    pub async fn lock_all<'a, I>(&self, targets: I) -> Vec<OwnedMutexGuard<()>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut targets: Vec<&str> = targets.into_iter().collect();
        targets.sort_unstable();
        targets.dedup();

        let mut guards = Vec::with_capacity(targets.len());
        for target in targets {
            let lock = self.lock_for(target);
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    fn lock_for(&self, target: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        // The map holds the only reference once no cycle holds or awaits a lock
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Whether a cycle currently holds `target`.
    pub fn is_locked(&self, target: &str) -> bool {
        self.locks
            .lock()
            .get(target)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of targets currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
