//! Per-key mutual exclusion.
//!
//! One in-flight mutation per aggregate id: the engine holds the key's
//! mutex for the whole load-check-commit sequence. Different keys never
//! contend beyond the short table lookup.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A table of lazily created per-key mutexes.
#[derive(Debug)]
pub struct LockTable<K> {
    slots: Mutex<BTreeMap<K, Arc<Mutex<()>>>>,
}

impl<K: Ord + Copy> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Copy> LockTable<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `key`.
    pub fn with_lock<T>(&self, key: K, f: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key).or_default())
        };
        let result = {
            let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };
        self.release(key, slot);
        result
    }

    /// Drop the slot once no other thread holds or waits on it.
    fn release(&self, key: K, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        drop(slot);
        if slots
            .get(&key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            slots.remove(&key);
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
