//! Per-edge local caches.
//!
//! One `LocalCache` contract spans every replacement algorithm; the
//! `CacheWrapper` layers copy-validity tracking, duplicate-admit handling,
//! and the too-large-object guard on top of whichever policy is active.

pub mod bestguess;
pub mod covered;
pub mod greedy_dual;
pub mod lru;
pub mod segcache;

pub use bestguess::BestGuessCache;
pub use covered::CoveredCache;
pub use greedy_dual::{GdAging, GdSf, GdSize, GreedyDualCache, LfuDa, LruK};
pub use lru::LruCache;
pub use segcache::SegCache;

use crate::config::CachePolicy;
use crate::types::{EdgeIdx, Key, VTime, Value};
use std::collections::HashSet;
use tracing::warn;

/// Unit-level (key-level) storage with eviction. One implementation per
/// replacement policy; every edge owns exactly one behind its wrapper.
pub trait LocalCache: Send {
    fn is_cached(&self, key: &Key) -> bool;

    /// Fetch and touch: may mutate recency state and advance virtual time.
    fn get(&mut self, key: &Key) -> Option<Value>;

    /// Fetch on behalf of a peer edge. Policies that score cooperative
    /// popularity separately override this; the default is a plain get.
    fn get_redirected(&mut self, key: &Key) -> Option<Value> {
        self.get(key)
    }

    /// In-place value replacement. Returns whether the key was cached.
    fn update(&mut self, key: &Key, value: Value) -> bool;

    /// Insert a new object. Precondition: not cached.
    fn admit(&mut self, key: &Key, value: Value);

    /// Whether this policy admits on its own after a fetch, without
    /// consulting the cooperative placement engine.
    fn need_independent_admit(&self, key: &Key) -> bool;

    /// Current eviction candidate, if any.
    fn victim_key(&self) -> Option<Key>;

    /// Remove a specific key (may differ from the suggested victim if that
    /// key is already gone). Returns the removed value.
    fn evict(&mut self, key: &Key) -> Option<Value>;

    /// Group eviction for coarse-grained policies: free at least
    /// `required_bytes`, returning every removed object.
    fn evict_bulk(&mut self, _required_bytes: u64) -> Vec<(Key, Value)> {
        unreachable!("bulk eviction called on a fine-grained cache")
    }

    fn size_bytes(&self) -> u64;

    fn has_fine_grained_management(&self) -> bool {
        true
    }

    // BestGuess hooks: virtual-time bookkeeping for cross-edge placement.

    /// Virtual time at which the current eviction candidate was last
    /// touched. `None` for policies without a vtime notion.
    fn victim_vtime(&self) -> Option<VTime> {
        None
    }

    fn note_peer_victim_vtime(&mut self, _edge: EdgeIdx, _vtime: VTime) {}

    fn peer_victim_vtimes(&self) -> Vec<(EdgeIdx, VTime)> {
        Vec::new()
    }

    // COVERED hooks: popularity signals for reward-based placement.

    /// (local, cooperative) access popularity of a key at this edge.
    fn popularity(&self, _key: &Key) -> (f64, f64) {
        (0.0, 0.0)
    }

    /// Popularity of the current eviction candidate.
    fn victim_popularity(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}

/// Build the local cache for a policy, over-provisioning is the caller's
/// concern: `capacity_bytes` is the full per-edge envelope.
pub fn build_cache(policy: CachePolicy, capacity_bytes: u64) -> Box<dyn LocalCache> {
    match policy {
        CachePolicy::Lru => Box::new(LruCache::new(capacity_bytes)),
        CachePolicy::LruK => Box::new(GreedyDualCache::new(capacity_bytes, LruK::default())),
        CachePolicy::GdSize => Box::new(GreedyDualCache::new(capacity_bytes, GdSize)),
        CachePolicy::Gdsf => Box::new(GreedyDualCache::new(capacity_bytes, GdSf::default())),
        CachePolicy::LfuDa => Box::new(GreedyDualCache::new(capacity_bytes, LfuDa::default())),
        CachePolicy::BestGuess => Box::new(BestGuessCache::new(capacity_bytes)),
        CachePolicy::Segcache => Box::new(SegCache::new(capacity_bytes)),
        CachePolicy::Covered => Box::new(CoveredCache::new(capacity_bytes)),
    }
}

/// Outcome of a wrapped local get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalGet {
    /// Cached and valid.
    Hit(Value),
    /// Cached but the copy is currently invalid (a write is in flight or
    /// just completed elsewhere).
    InvalidHit,
    Miss,
}

/// The per-edge cache with copy-validity tracking layered on the policy.
pub struct CacheWrapper {
    inner: Box<dyn LocalCache>,
    invalid: HashSet<Key>,
    capacity_bytes: u64,
}

impl CacheWrapper {
    pub fn new(policy: CachePolicy, capacity_bytes: u64) -> Self {
        Self {
            inner: build_cache(policy, capacity_bytes),
            invalid: HashSet::new(),
            capacity_bytes,
        }
    }

    pub fn is_cached(&self, key: &Key) -> bool {
        self.inner.is_cached(key)
    }

    pub fn get(&mut self, key: &Key) -> LocalGet {
        self.classify(key, |inner, key| inner.get(key))
    }

    /// Target-edge leg of a cross-edge get.
    pub fn get_redirected(&mut self, key: &Key) -> LocalGet {
        self.classify(key, |inner, key| inner.get_redirected(key))
    }

    fn classify(
        &mut self,
        key: &Key,
        fetch: impl FnOnce(&mut Box<dyn LocalCache>, &Key) -> Option<Value>,
    ) -> LocalGet {
        match fetch(&mut self.inner, key) {
            Some(_) if self.invalid.contains(key) => LocalGet::InvalidHit,
            Some(value) => LocalGet::Hit(value),
            None => LocalGet::Miss,
        }
    }

    /// Admit a fetched object. A duplicate admit warns and is ignored; an
    /// object that cannot fit at all is rejected outright.
    /// Returns whether the object is cached (and, if `valid`, readable)
    /// afterwards.
    pub fn admit(&mut self, key: &Key, value: Value, valid: bool) -> bool {
        let object_size = key.len_bytes() + value.size_bytes();
        if object_size >= self.capacity_bytes {
            warn!(
                key = %key,
                object_size,
                capacity = self.capacity_bytes,
                "object does not fit in cache, not admitted"
            );
            return false;
        }
        if self.inner.is_cached(key) {
            warn!(key = %key, "duplicate admit ignored");
            return true;
        }
        self.inner.admit(key, value);
        if valid {
            self.invalid.remove(key);
        } else {
            self.invalid.insert(key.clone());
        }
        true
    }

    /// In-place value replacement; a successful update leaves the copy in
    /// the given validity state.
    pub fn update(&mut self, key: &Key, value: Value, valid: bool) -> bool {
        let object_size = key.len_bytes() + value.size_bytes();
        if object_size >= self.capacity_bytes {
            warn!(
                key = %key,
                object_size,
                capacity = self.capacity_bytes,
                "updated object does not fit, dropping local copy"
            );
            self.evict(key);
            return false;
        }
        let was_cached = self.inner.update(key, value);
        if was_cached {
            if valid {
                self.invalid.remove(key);
            } else {
                self.invalid.insert(key.clone());
            }
        }
        was_cached
    }

    /// Mark a cached copy stale. Returns whether a copy was present.
    pub fn invalidate(&mut self, key: &Key) -> bool {
        if self.inner.is_cached(key) {
            self.invalid.insert(key.clone());
            true
        } else {
            false
        }
    }

    /// Mark a cached copy fresh again.
    pub fn validate(&mut self, key: &Key) {
        self.invalid.remove(key);
    }

    pub fn evict(&mut self, key: &Key) -> Option<Value> {
        self.invalid.remove(key);
        self.inner.evict(key)
    }

    pub fn evict_bulk(&mut self, required_bytes: u64) -> Vec<(Key, Value)> {
        let victims = self.inner.evict_bulk(required_bytes);
        for (key, _) in &victims {
            self.invalid.remove(key);
        }
        victims
    }

    pub fn victim_key(&self) -> Option<Key> {
        self.inner.victim_key()
    }

    pub fn need_independent_admit(&self, key: &Key) -> bool {
        self.inner.need_independent_admit(key)
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner.size_bytes()
    }

    pub fn has_fine_grained_management(&self) -> bool {
        self.inner.has_fine_grained_management()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn victim_vtime(&self) -> Option<VTime> {
        self.inner.victim_vtime()
    }

    pub fn note_peer_victim_vtime(&mut self, edge: EdgeIdx, vtime: VTime) {
        self.inner.note_peer_victim_vtime(edge, vtime);
    }

    pub fn peer_victim_vtimes(&self) -> Vec<(EdgeIdx, VTime)> {
        self.inner.peer_victim_vtimes()
    }

    pub fn popularity(&self, key: &Key) -> (f64, f64) {
        self.inner.popularity(key)
    }

    pub fn victim_popularity(&self) -> (f64, f64) {
        self.inner.victim_popularity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper(capacity: u64) -> CacheWrapper {
        CacheWrapper::new(CachePolicy::Lru, capacity)
    }

    #[test]
    fn test_admit_evict_round_trip() {
        let mut c = wrapper(10_000);
        let key = Key::from("k");
        assert!(c.admit(&key, Value::new(vec![0u8; 100]), true));
        assert!(c.is_cached(&key));
        assert!(c.evict(&key).is_some());
        assert!(!c.is_cached(&key));
        assert_eq!(c.size_bytes(), 0);
    }

    #[test]
    fn test_duplicate_admit_no_size_drift() {
        let mut c = wrapper(10_000);
        let key = Key::from("k");
        c.admit(&key, Value::new(vec![0u8; 100]), true);
        let size = c.size_bytes();
        c.admit(&key, Value::new(vec![0u8; 100]), true);
        assert_eq!(c.size_bytes(), size);
    }

    #[test]
    fn test_too_large_object_never_admitted() {
        let mut c = wrapper(1000);
        let key = Key::from("big");
        assert!(!c.admit(&key, Value::new(vec![0u8; 2000]), true));
        assert!(!c.is_cached(&key));
        assert_eq!(c.size_bytes(), 0);
    }

    #[test]
    fn test_invalid_copy_is_not_a_valid_hit() {
        let mut c = wrapper(10_000);
        let key = Key::from("k");
        c.admit(&key, Value::new(b"v1".to_vec()), true);
        assert!(matches!(c.get(&key), LocalGet::Hit(_)));

        assert!(c.invalidate(&key));
        assert_eq!(c.get(&key), LocalGet::InvalidHit);

        c.validate(&key);
        assert!(matches!(c.get(&key), LocalGet::Hit(_)));
    }
}
