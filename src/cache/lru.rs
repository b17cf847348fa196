//! Classic least-recently-used cache.

use super::LocalCache;
use crate::types::{Key, LOOKUP_ENTRY_OVERHEAD, VTime, Value};
use std::collections::{BTreeMap, HashMap};

struct LruEntry {
    value: Value,
    vtime: VTime,
}

/// LRU over a lookup map plus a vtime-ordered recency index. Touches move
/// the entry to the head by stamping a fresh virtual time; the victim is
/// the entry with the smallest vtime.
pub struct LruCache {
    items: HashMap<Key, LruEntry>,
    recency: BTreeMap<VTime, Key>,
    clock: VTime,
    size: u64,
    capacity_bytes: u64,
}

impl LruCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            items: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            size: 0,
            capacity_bytes,
        }
    }

    fn touch(&mut self, key: &Key) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.items.get_mut(key) {
            self.recency.remove(&entry.vtime);
            entry.vtime = clock;
            self.recency.insert(clock, key.clone());
        }
    }

    fn object_bytes(key: &Key, value: &Value) -> u64 {
        key.len_bytes() + value.size_bytes()
    }

    fn index_bytes(key: &Key) -> u64 {
        key.len_bytes() + LOOKUP_ENTRY_OVERHEAD
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

impl LocalCache for LruCache {
    fn is_cached(&self, key: &Key) -> bool {
        self.items.contains_key(key)
    }

    fn get(&mut self, key: &Key) -> Option<Value> {
        if !self.items.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.items.get(key).map(|e| e.value.clone())
    }

    fn update(&mut self, key: &Key, value: Value) -> bool {
        if !self.items.contains_key(key) {
            return false;
        }
        self.touch(key);
        let entry = self.items.get_mut(key).expect("touched entry must exist");
        self.size = self.size - entry.value.size_bytes() + value.size_bytes();
        entry.value = value;
        true
    }

    fn admit(&mut self, key: &Key, value: Value) {
        debug_assert!(!self.items.contains_key(key), "admit of a cached key");
        self.clock += 1;
        self.size += Self::object_bytes(key, &value) + Self::index_bytes(key);
        self.recency.insert(self.clock, key.clone());
        self.items.insert(
            key.clone(),
            LruEntry {
                value,
                vtime: self.clock,
            },
        );
    }

    fn need_independent_admit(&self, _key: &Key) -> bool {
        true
    }

    fn victim_key(&self) -> Option<Key> {
        self.recency.values().next().cloned()
    }

    fn evict(&mut self, key: &Key) -> Option<Value> {
        let entry = self.items.remove(key)?;
        self.recency.remove(&entry.vtime);
        self.size -= Self::object_bytes(key, &entry.value) + Self::index_bytes(key);
        Some(entry.value)
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_is_least_recently_used() {
        let mut c = LruCache::new(1 << 20);
        c.admit(&Key::from("a"), Value::new(vec![0u8; 10]));
        c.admit(&Key::from("b"), Value::new(vec![0u8; 10]));
        c.admit(&Key::from("c"), Value::new(vec![0u8; 10]));
        assert_eq!(c.victim_key(), Some(Key::from("a")));

        // Touch "a"; "b" becomes the tail.
        assert!(c.get(&Key::from("a")).is_some());
        assert_eq!(c.victim_key(), Some(Key::from("b")));
    }

    #[test]
    fn test_update_replaces_value_and_size() {
        let mut c = LruCache::new(1 << 20);
        let key = Key::from("a");
        c.admit(&key, Value::new(vec![0u8; 10]));
        let before = c.size_bytes();
        assert!(c.update(&key, Value::new(vec![0u8; 30])));
        assert_eq!(c.size_bytes(), before + 20);
        assert_eq!(c.get(&key).unwrap().size_bytes(), 30);
    }

    #[test]
    fn test_evict_unknown_key_is_none() {
        let mut c = LruCache::new(1 << 20);
        assert!(c.evict(&Key::from("ghost")).is_none());
    }

    #[test]
    fn test_size_returns_to_zero() {
        let mut c = LruCache::new(1 << 20);
        let key = Key::from("a");
        c.admit(&key, Value::new(vec![0u8; 64]));
        c.evict(&key);
        assert_eq!(c.size_bytes(), 0);
    }
}
