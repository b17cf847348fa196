//! Segment-structured cache with coarse-grained (group) eviction.
//!
//! Objects append into fixed-budget segments; eviction retires whole
//! segments FIFO and returns every object they held, so the caller can
//! withdraw the directory announcements in one batch.

use super::LocalCache;
use crate::types::{Key, LOOKUP_ENTRY_OVERHEAD, Value};
use std::collections::{HashMap, VecDeque};

/// How many segments the capacity envelope is split into.
const SEGMENT_COUNT: u64 = 16;

struct Segment {
    id: u64,
    items: Vec<(Key, Value)>,
    bytes: u64,
}

pub struct SegCache {
    segments: VecDeque<Segment>,
    index: HashMap<Key, u64>,
    next_id: u64,
    seg_budget: u64,
    size: u64,
    capacity_bytes: u64,
}

impl SegCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            segments: VecDeque::new(),
            index: HashMap::new(),
            next_id: 0,
            seg_budget: (capacity_bytes / SEGMENT_COUNT).max(1),
            size: 0,
            capacity_bytes,
        }
    }

    fn object_bytes(key: &Key, value: &Value) -> u64 {
        key.len_bytes() + value.size_bytes()
    }

    fn active_segment(&mut self, incoming: u64) -> &mut Segment {
        let need_new = match self.segments.back() {
            Some(seg) => seg.bytes + incoming > self.seg_budget,
            None => true,
        };
        if need_new {
            self.next_id += 1;
            self.segments.push_back(Segment {
                id: self.next_id,
                items: Vec::new(),
                bytes: 0,
            });
        }
        self.segments.back_mut().expect("segment just ensured")
    }

    fn segment_mut(&mut self, id: u64) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|seg| seg.id == id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

impl LocalCache for SegCache {
    fn is_cached(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    fn get(&mut self, key: &Key) -> Option<Value> {
        let seg_id = *self.index.get(key)?;
        let seg = self.segment_mut(seg_id)?;
        seg.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn update(&mut self, key: &Key, value: Value) -> bool {
        let Some(&seg_id) = self.index.get(key) else {
            return false;
        };
        let Some(seg) = self.segment_mut(seg_id) else {
            return false;
        };
        let Some(slot) = seg.items.iter_mut().find(|(k, _)| k == key) else {
            return false;
        };
        let old = slot.1.size_bytes();
        let new = value.size_bytes();
        slot.1 = value;
        seg.bytes = seg.bytes - old + new;
        self.size = self.size - old + new;
        true
    }

    fn admit(&mut self, key: &Key, value: Value) {
        debug_assert!(!self.index.contains_key(key), "admit of a cached key");
        let bytes = Self::object_bytes(key, &value);
        let seg = self.active_segment(bytes);
        let seg_id = seg.id;
        seg.items.push((key.clone(), value));
        seg.bytes += bytes;
        self.index.insert(key.clone(), seg_id);
        self.size += bytes + key.len_bytes() + LOOKUP_ENTRY_OVERHEAD;
    }

    fn need_independent_admit(&self, _key: &Key) -> bool {
        true
    }

    fn victim_key(&self) -> Option<Key> {
        // Group-managed: individual victims are not nominated.
        None
    }

    fn evict(&mut self, key: &Key) -> Option<Value> {
        let seg_id = self.index.remove(key)?;
        let seg = self.segment_mut(seg_id)?;
        let pos = seg.items.iter().position(|(k, _)| k == key)?;
        let (key, value) = seg.items.remove(pos);
        let bytes = Self::object_bytes(&key, &value);
        seg.bytes -= bytes;
        self.size -= bytes + key.len_bytes() + LOOKUP_ENTRY_OVERHEAD;
        Some(value)
    }

    fn evict_bulk(&mut self, required_bytes: u64) -> Vec<(Key, Value)> {
        let mut victims = Vec::new();
        let mut freed = 0u64;
        while freed < required_bytes {
            let Some(seg) = self.segments.pop_front() else {
                break;
            };
            for (key, value) in seg.items {
                let bytes =
                    Self::object_bytes(&key, &value) + key.len_bytes() + LOOKUP_ENTRY_OVERHEAD;
                freed += bytes;
                self.size -= bytes;
                self.index.remove(&key);
                victims.push((key, value));
            }
        }
        victims
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }

    fn has_fine_grained_management(&self) -> bool {
        false
    }
}
