//! The greedy-dual cache family: one core, four aging policies.
//!
//! The core keeps an aging factor L, an ordered multimap from H-value to
//! object, and a lookup table. Victim = smallest H; evicting the victim
//! raises L to the victim's H so newly admitted objects start above it.
//! Policies differ only in how H is computed and what per-key bookkeeping
//! they carry, so they plug in through `GdAging`.

use super::LocalCache;
use crate::types::{Key, LOOKUP_ENTRY_OVERHEAD, SCORE_ENTRY_OVERHEAD, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Ordered score key: H-value with an insertion sequence as tie-break, so
/// equal scores evict in least-recently-touched order.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreKey {
    hval: f64,
    seq: u64,
}

impl Eq for ScoreKey {}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hval
            .total_cmp(&other.hval)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Per-policy aging: H-value computation plus auxiliary bookkeeping.
pub trait GdAging: Send {
    /// Called once when a key is admitted, before the first `age_value`.
    fn on_admit(&mut self, key: &Key);

    /// Called on every hit and in-place update, before `age_value`.
    fn on_access(&mut self, key: &Key);

    /// Called after a key leaves the cache.
    fn on_evict(&mut self, key: &Key);

    /// H-value for a cached or being-admitted object given the current
    /// aging factor L.
    fn age_value(&mut self, key: &Key, value: &Value, l: f64) -> f64;
}

/// GDSize: H = L + 1/size. Small objects are worth keeping.
pub struct GdSize;

impl GdAging for GdSize {
    fn on_admit(&mut self, _key: &Key) {}
    fn on_access(&mut self, _key: &Key) {}
    fn on_evict(&mut self, _key: &Key) {}

    fn age_value(&mut self, key: &Key, value: &Value, l: f64) -> f64 {
        let object_size = (key.len_bytes() + value.size_bytes()).max(1);
        l + 1.0 / object_size as f64
    }
}

/// GDSF: H = L + freq/size, frequency incremented on every hit and update.
#[derive(Default)]
pub struct GdSf {
    freq: HashMap<Key, u64>,
}

impl GdAging for GdSf {
    fn on_admit(&mut self, key: &Key) {
        self.freq.insert(key.clone(), 1);
    }

    fn on_access(&mut self, key: &Key) {
        if let Some(f) = self.freq.get_mut(key) {
            *f += 1;
        }
    }

    fn on_evict(&mut self, key: &Key) {
        self.freq.remove(key);
    }

    fn age_value(&mut self, key: &Key, value: &Value, l: f64) -> f64 {
        let object_size = (key.len_bytes() + value.size_bytes()).max(1);
        let freq = self.freq.get(key).copied().unwrap_or(1);
        l + freq as f64 / object_size as f64
    }
}

/// LFU with dynamic aging: H = L + freq.
#[derive(Default)]
pub struct LfuDa {
    freq: HashMap<Key, u64>,
}

impl GdAging for LfuDa {
    fn on_admit(&mut self, key: &Key) {
        self.freq.insert(key.clone(), 1);
    }

    fn on_access(&mut self, key: &Key) {
        if let Some(f) = self.freq.get_mut(key) {
            *f += 1;
        }
    }

    fn on_evict(&mut self, key: &Key) {
        self.freq.remove(key);
    }

    fn age_value(&mut self, key: &Key, _value: &Value, l: f64) -> f64 {
        l + self.freq.get(key).copied().unwrap_or(1) as f64
    }
}

/// Default history depth for LRU-K.
pub const LRUK_DEFAULT_K: usize = 2;

/// LRU-K: per-key bounded queue of the last K access virtual times. The
/// age value is the oldest of the last K accesses, or 0 while the key has
/// fewer than K; the smallest age value loses. The running L plays no
/// part.
pub struct LruK {
    k: usize,
    clock: u64,
    history: HashMap<Key, VecDeque<u64>>,
}

impl Default for LruK {
    fn default() -> Self {
        Self::with_k(LRUK_DEFAULT_K)
    }
}

impl LruK {
    pub fn with_k(k: usize) -> Self {
        assert!(k >= 1);
        Self {
            k,
            clock: 0,
            history: HashMap::new(),
        }
    }

    fn record(&mut self, key: &Key) {
        self.clock += 1;
        let clock = self.clock;
        let k = self.k;
        let queue = self.history.entry(key.clone()).or_default();
        queue.push_back(clock);
        while queue.len() > k {
            queue.pop_front();
        }
    }
}

impl GdAging for LruK {
    fn on_admit(&mut self, key: &Key) {
        self.record(key);
    }

    fn on_access(&mut self, key: &Key) {
        self.record(key);
    }

    fn on_evict(&mut self, key: &Key) {
        self.history.remove(key);
    }

    fn age_value(&mut self, key: &Key, _value: &Value, _l: f64) -> f64 {
        match self.history.get(key) {
            Some(queue) if queue.len() >= self.k => *queue.front().unwrap_or(&0) as f64,
            _ => 0.0,
        }
    }
}

struct GdEntry {
    score: ScoreKey,
    value: Value,
}

pub struct GreedyDualCache<A: GdAging> {
    aging: A,
    /// The running aging factor, raised to the victim's H on eviction.
    l: f64,
    scores: BTreeMap<ScoreKey, Key>,
    index: HashMap<Key, GdEntry>,
    seq: u64,
    size: u64,
    capacity_bytes: u64,
}

impl<A: GdAging> GreedyDualCache<A> {
    pub fn new(capacity_bytes: u64, aging: A) -> Self {
        Self {
            aging,
            l: 0.0,
            scores: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
            size: 0,
            capacity_bytes,
        }
    }

    fn next_score(&mut self, hval: f64) -> ScoreKey {
        self.seq += 1;
        ScoreKey {
            hval,
            seq: self.seq,
        }
    }

    fn reposition(&mut self, key: &Key) {
        let Some(entry) = self.index.get(key) else {
            return;
        };
        let old_score = entry.score;
        let value = entry.value.clone();
        let hval = self.aging.age_value(key, &value, self.l);
        let new_score = self.next_score(hval);
        self.scores.remove(&old_score);
        self.scores.insert(new_score, key.clone());
        if let Some(entry) = self.index.get_mut(key) {
            entry.score = new_score;
        }
    }

    fn object_bytes(key: &Key, value: &Value) -> u64 {
        key.len_bytes() + value.size_bytes() + SCORE_ENTRY_OVERHEAD
    }

    fn index_bytes(key: &Key) -> u64 {
        key.len_bytes() + LOOKUP_ENTRY_OVERHEAD
    }

    pub fn aging_factor(&self) -> f64 {
        self.l
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

impl<A: GdAging> LocalCache for GreedyDualCache<A> {
    fn is_cached(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    fn get(&mut self, key: &Key) -> Option<Value> {
        if !self.index.contains_key(key) {
            return None;
        }
        self.aging.on_access(key);
        self.reposition(key);
        self.index.get(key).map(|e| e.value.clone())
    }

    fn update(&mut self, key: &Key, value: Value) -> bool {
        if !self.index.contains_key(key) {
            return false;
        }
        self.aging.on_access(key);
        let entry = self.index.get_mut(key).expect("checked above");
        self.size = self.size - entry.value.size_bytes() + value.size_bytes();
        entry.value = value;
        self.reposition(key);
        true
    }

    fn admit(&mut self, key: &Key, value: Value) {
        debug_assert!(!self.index.contains_key(key), "admit of a cached key");
        self.aging.on_admit(key);
        let hval = self.aging.age_value(key, &value, self.l);
        let score = self.next_score(hval);
        self.size += Self::object_bytes(key, &value) + Self::index_bytes(key);
        self.scores.insert(score, key.clone());
        self.index.insert(key.clone(), GdEntry { score, value });
    }

    fn need_independent_admit(&self, _key: &Key) -> bool {
        true
    }

    fn victim_key(&self) -> Option<Key> {
        self.scores.values().next().cloned()
    }

    fn evict(&mut self, key: &Key) -> Option<Value> {
        let entry = self.index.remove(key)?;
        // Evicting the current minimum advances the aging factor.
        if self
            .scores
            .keys()
            .next()
            .is_some_and(|min| *min == entry.score)
        {
            self.l = entry.score.hval;
        }
        self.scores.remove(&entry.score);
        self.aging.on_evict(key);
        self.size -= Self::object_bytes(key, &entry.value) + Self::index_bytes(key);
        Some(entry.value)
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }
}
