//! Capacity-bounded LRU cache for in-flight and completed requests
//!
//! Values are typically shared futures, so a `get` never blocks on network:
//! callers compose on the returned value independently of cache internals.
//! Eviction never cancels work a holder is still awaiting, because holders
//! keep their own reference to the shared value.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::CacheMiss;

/// LRU cache mapping request keys to in-flight-or-resolved values
///
/// Access order is tracked to determine which entries to evict when the
/// cache is full. Both `get` and `force_insert` count as a touch.
pub struct MemoryRequestCache<K, V> {
    entries: HashMap<K, V>,
    /// Access order: oldest first, newest last
    access_order: Vec<K>,
    /// Maximum number of entries to keep
    capacity: usize,
}

impl<K, V> MemoryRequestCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create a new cache with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            access_order: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Check whether a key is present
    pub fn has(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the value for a key, marking it as recently used
    ///
    /// Fails with [`CacheMiss`] if the key is absent. Callers check `has`
    /// first or accept the failure.
    pub fn get(&mut self, key: &K) -> Result<V, CacheMiss> {
        match self.entries.get(key) {
            Some(value) => {
                let value = value.clone();
                self.touch(key);
                Ok(value)
            }
            None => Err(CacheMiss {
                key: format!("{key:?}"),
            }),
        }
    }

    /// Unconditionally insert a value, evicting the least recently used
    /// entry if the capacity would be exceeded
    ///
    /// An existing value under the same key is overwritten, never merged.
    pub fn force_insert(&mut self, key: K, value: V) {
        if self.entries.contains_key(&key) {
            self.remove_from_access_order(&key);
        } else if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(key.clone(), value);
        self.access_order.push(key);
    }

    /// Remove an entry, returning it if it existed
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_from_access_order(key);
        self.entries.remove(key)
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self.access_order.first().cloned() {
            log::debug!("evicting least recently used cache entry {key:?}");
            self.remove(&key);
        }
    }

    /// Move a key to the end of the access order (most recent)
    fn touch(&mut self, key: &K) {
        self.remove_from_access_order(key);
        self.access_order.push(key.clone());
    }

    fn remove_from_access_order(&mut self, key: &K) {
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
    }
}
