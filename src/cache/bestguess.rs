//! BestGuess local cache: LRU locally, approximate global LRU for
//! placement.
//!
//! The edge runs classic LRU but never admits on its own; placement is
//! triggered externally. Alongside the cache it tracks, for every
//! neighbor, the virtual time of that neighbor's current eviction
//! candidate. A placement decision picks the edge whose victim vtime is
//! smallest, i.e. the coldest LRU tail in the cluster.

use super::LocalCache;
use crate::types::{EdgeIdx, Key, LOOKUP_ENTRY_OVERHEAD, VTime, Value};
use std::collections::{BTreeMap, HashMap};

struct BgEntry {
    value: Value,
    vtime: VTime,
}

pub struct BestGuessCache {
    items: HashMap<Key, BgEntry>,
    recency: BTreeMap<VTime, Key>,
    peer_victim_vtime: HashMap<EdgeIdx, VTime>,
    cur_vtime: VTime,
    size: u64,
    capacity_bytes: u64,
}

impl BestGuessCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            items: HashMap::new(),
            recency: BTreeMap::new(),
            peer_victim_vtime: HashMap::new(),
            cur_vtime: 0,
            size: 0,
            capacity_bytes,
        }
    }

    fn object_bytes(key: &Key, value: &Value) -> u64 {
        key.len_bytes() + value.size_bytes()
    }

    fn index_bytes(key: &Key) -> u64 {
        key.len_bytes() + LOOKUP_ENTRY_OVERHEAD
    }

    pub fn current_vtime(&self) -> VTime {
        self.cur_vtime
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

impl LocalCache for BestGuessCache {
    fn is_cached(&self, key: &Key) -> bool {
        self.items.contains_key(key)
    }

    fn get(&mut self, key: &Key) -> Option<Value> {
        let result = if let Some(entry) = self.items.get_mut(key) {
            let old = entry.vtime;
            entry.vtime = self.cur_vtime;
            let value = entry.value.clone();
            self.recency.remove(&old);
            self.recency.insert(self.cur_vtime, key.clone());
            Some(value)
        } else {
            None
        };
        // Virtual time advances on every access, hit or miss.
        self.cur_vtime += 1;
        result
    }

    fn update(&mut self, key: &Key, value: Value) -> bool {
        let updated = if let Some(entry) = self.items.get_mut(key) {
            let old = entry.vtime;
            self.size = self.size - entry.value.size_bytes() + value.size_bytes();
            entry.value = value;
            entry.vtime = self.cur_vtime;
            self.recency.remove(&old);
            self.recency.insert(self.cur_vtime, key.clone());
            true
        } else {
            false
        };
        self.cur_vtime += 1;
        updated
    }

    fn admit(&mut self, key: &Key, value: Value) {
        debug_assert!(!self.items.contains_key(key), "admit of a cached key");
        self.size += Self::object_bytes(key, &value) + Self::index_bytes(key);
        self.recency.insert(self.cur_vtime, key.clone());
        self.items.insert(
            key.clone(),
            BgEntry {
                value,
                vtime: self.cur_vtime,
            },
        );
        // Advance vtime on admission too, so concurrent placement
        // notifications never collide on the same recency slot.
        self.cur_vtime += 1;
    }

    fn need_independent_admit(&self, _key: &Key) -> bool {
        // Placement is always triggered externally.
        false
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

    fn victim_vtime(&self) -> Option<VTime> {
        self.recency.keys().next().copied()
    }

    fn note_peer_victim_vtime(&mut self, edge: EdgeIdx, vtime: VTime) {
        self.peer_victim_vtime.insert(edge, vtime);
    }

    fn peer_victim_vtimes(&self) -> Vec<(EdgeIdx, VTime)> {
        self.peer_victim_vtime
            .iter()
            .map(|(&edge, &vtime)| (edge, vtime))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_vtime_tracks_lru_tail() {
        let mut c = BestGuessCache::new(1 << 20);
        c.admit(&Key::from("a"), Value::new(vec![0u8; 10]));
        c.admit(&Key::from("b"), Value::new(vec![0u8; 10]));
        let tail_vtime = c.victim_vtime().unwrap();
        assert_eq!(c.victim_key(), Some(Key::from("a")));

        // Touching "a" moves the tail to "b" and raises the victim vtime.
        c.get(&Key::from("a"));
        assert_eq!(c.victim_key(), Some(Key::from("b")));
        assert!(c.victim_vtime().unwrap() > tail_vtime);
    }

    #[test]
    fn test_vtime_advances_on_miss() {
        let mut c = BestGuessCache::new(1 << 20);
        let before = c.current_vtime();
        assert!(c.get(&Key::from("missing")).is_none());
        assert_eq!(c.current_vtime(), before + 1);
    }

    #[test]
    fn test_peer_vtimes_recorded() {
        let mut c = BestGuessCache::new(1 << 20);
        c.note_peer_victim_vtime(1, 50);
        c.note_peer_victim_vtime(2, 200);
        c.note_peer_victim_vtime(1, 60);
        let mut vtimes = c.peer_victim_vtimes();
        vtimes.sort();
        assert_eq!(vtimes, vec![(1, 60), (2, 200)]);
    }

    #[test]
    fn test_never_admits_independently() {
        let c = BestGuessCache::new(1 << 20);
        assert!(!c.need_independent_admit(&Key::from("k")));
    }
}
