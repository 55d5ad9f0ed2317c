// crates/resilience/src/keyed_lock.rs
//! Per-key async mutual exclusion
//!
//! Serializes work on one key (an entry id) while letting work on different
//! keys run concurrently. Slots are dropped once no one holds or waits on them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// A set of async locks addressed by key. Clones share the same locks.
#[derive(Debug)]
pub struct KeyedLock<K> {
    slots: Slots<K>,
}

impl<K> Clone for KeyedLock<K> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Waits until `key` is free and holds it until the guard drops
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyedGuard {
            key,
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Holds one key of a [`KeyedLock`]
#[derive(Debug)]
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    key: K,
    slots: Slots<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> KeyedGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut slots) = self.slots.lock() {
            // Only the map still references the slot: nobody holds or waits on it
            let unused = slots
                .get(&self.key)
                .map(|slot| Arc::strong_count(slot) == 1)
                .unwrap_or(false);
            if unused {
                slots.remove(&self.key);
            }
        }
    }
}
