//! # LRU Cache
//!
//! A small least-recently-used map whose entries expire after a TTL.
//! Backs the nearby-search result cache, where capacity is tiny (1 by
//! default), so eviction is a linear scan.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// Bounded LRU map with per-entry insertion time.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    access_counter: u64,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    stored_at: DateTime<Utc>,
    last_access: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    /// Get a value stored less than `ttl` before `now`, updating its access time.
    ///
    /// An expired entry is removed and `None` returned.
    pub fn get_fresh(&mut self, key: &K, now: DateTime<Utc>, ttl: Duration) -> Option<(&V, DateTime<Utc>)> {
        let expired = match self.entries.get(key) {
            Some(slot) => now - slot.stored_at >= ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }

        self.access_counter += 1;
        let counter = self.access_counter;
        self.entries.get_mut(key).map(|slot| {
            slot.last_access = counter;
            (&slot.value, slot.stored_at)
        })
    }

    /// Insert a value stored at `now`, evicting the least recently used entry if full.
    pub fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        self.access_counter += 1;

        if let Some(slot) = self.entries.get_mut(&key) {
            slot.value = value;
            slot.stored_at = now;
            slot.last_access = self.access_counter;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key,
            Slot {
                value,
                stored_at: now,
                last_access: self.access_counter,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_counter = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_access)
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest_key {
            self.entries.remove(&key);
        }
    }
}
