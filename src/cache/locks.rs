//! Per-name advisory locks
//!
//! Serializes cache fills and upload commits for the same file name inside
//! this process. Entries are created on demand and pruned once the last
//! holder or waiter is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type NameMutex = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct NameLocks {
    inner: Mutex<HashMap<String, NameMutex>>,
}

/// Held lock on one name; released on drop
pub struct NameGuard<'a> {
    locks: &'a NameLocks,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`
    pub async fn lock(&self, name: &str) -> NameGuard<'_> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(name.to_string()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        NameGuard {
            locks: self,
            name: name.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of names currently locked or awaited
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, name: &str) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: nobody holds or awaits it
        if map.get(name).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(name);
        }
    }
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.name);
    }
}
