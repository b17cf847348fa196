//! The beacon-side directory table and the MSI write guard.

use super::dirinfo::{DirectoryInfo, DirinfoSet};
use super::entry::{DirectoryEntry, DirectoryMetadata};
use crate::hash::SlotHasher;
use crate::types::{EdgeIdx, Key};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

/// Result of a directory lookup at the beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupOutcome {
    /// A writer currently holds the key's write lock; readers must bypass
    /// every cached copy and go to the cloud.
    pub is_being_written: bool,
    /// At least one listed edge has a valid copy.
    pub valid_exists: bool,
    /// One arbitrary valid edge, if any.
    pub dirinfo: Option<DirectoryInfo>,
}

/// Sharded map key → `DirectoryEntry` with byte-exact capacity accounting.
///
/// Each edge owns one table holding the entries for keys whose consistent
/// hash maps to it. Entries that become empty are removed outright, so the
/// table never accumulates tombstones.
pub struct DirectoryTable {
    shards: Vec<RwLock<HashMap<Key, DirectoryEntry>>>,
    hasher: SlotHasher,
    size_bytes: AtomicU64,
    writelocks: std::sync::Arc<WritelockTable>,
}

impl DirectoryTable {
    pub fn new(shard_cnt: usize, writelocks: std::sync::Arc<WritelockTable>) -> Self {
        assert!(shard_cnt > 0, "directory table needs at least one shard");
        Self {
            shards: (0..shard_cnt).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: SlotHasher::new(),
            size_bytes: AtomicU64::new(0),
            writelocks,
        }
    }

    fn shard(&self, key: &Key) -> &RwLock<HashMap<Key, DirectoryEntry>> {
        &self.shards[self.hasher.shard_of(key, self.shards.len())]
    }

    /// Scan the key's entry for a valid copy, together with the write-lock
    /// state observed at the same moment.
    pub async fn lookup(&self, key: &Key) -> LookupOutcome {
        let shard = self.shard(key).read().await;
        let is_being_written = self.writelocks.is_being_written(key);
        match shard.get(key) {
            Some(entry) => {
                let dirinfo = entry.first_valid();
                LookupOutcome {
                    is_being_written,
                    valid_exists: dirinfo.is_some(),
                    dirinfo,
                }
            }
            None => LookupOutcome {
                is_being_written,
                valid_exists: false,
                dirinfo: None,
            },
        }
    }

    /// Admit or evict one edge's fact for the key.
    /// Returns whether the key is currently locked for a write.
    ///
    /// An admit that races with an in-flight write lands invalid: the
    /// copy may already be stale, and only the writer's finish-block may
    /// revalidate.
    pub async fn update(&self, key: &Key, edge_idx: EdgeIdx, is_admit: bool) -> bool {
        let mut shard = self.shard(key).write().await;
        let is_being_written = self.writelocks.is_being_written(key);
        let info = DirectoryInfo::new(edge_idx);
        if is_admit {
            let entry = shard.entry(key.clone()).or_insert_with(|| {
                self.size_bytes.fetch_add(key.len_bytes(), Ordering::Relaxed);
                DirectoryEntry::new()
            });
            let before = entry.size_bytes();
            entry.add(info, DirectoryMetadata::new(!is_being_written));
            self.size_bytes
                .fetch_add(entry.size_bytes() - before, Ordering::Relaxed);
        } else if let Some(entry) = shard.get_mut(key) {
            let before = entry.size_bytes();
            entry.remove(&info);
            self.size_bytes
                .fetch_sub(before - entry.size_bytes(), Ordering::Relaxed);
            if entry.is_empty() {
                shard.remove(key);
                self.size_bytes.fetch_sub(key.len_bytes(), Ordering::Relaxed);
            }
        }
        is_being_written
    }

    /// Flip every listed metadata to invalid; returns the listed infos for
    /// invalidation fan-out. Used by the write path.
    pub async fn invalidate_all(&self, key: &Key) -> DirinfoSet {
        let mut shard = self.shard(key).write().await;
        match shard.get_mut(key) {
            Some(entry) => entry.invalidate_all(),
            None => DirinfoSet::empty(),
        }
    }

    /// Re-validate one edge's metadata after its copy caught up with the
    /// latest write. Never adds a fact.
    pub async fn revalidate(&self, key: &Key, edge_idx: EdgeIdx) {
        let mut shard = self.shard(key).write().await;
        if let Some(entry) = shard.get_mut(key) {
            entry.validate_if_exists(&DirectoryInfo::new(edge_idx));
        }
    }

    /// Compare-and-insert: add `(edge, invalid)` iff the key has no
    /// directory entry at all. BestGuess placement uses this to reserve a
    /// slot before the value lands anywhere.
    pub async fn preserve_if_unmapped(&self, key: &Key, edge_idx: EdgeIdx) -> bool {
        let mut shard = self.shard(key).write().await;
        if shard.contains_key(key) {
            return false;
        }
        let mut entry = DirectoryEntry::new();
        entry.add(DirectoryInfo::new(edge_idx), DirectoryMetadata::new(false));
        self.size_bytes
            .fetch_add(key.len_bytes() + entry.size_bytes(), Ordering::Relaxed);
        shard.insert(key.clone(), entry);
        true
    }

    /// Replace a BestGuess reservation with the chosen placement edge.
    pub async fn move_reservation(&self, key: &Key, from: EdgeIdx, to: EdgeIdx) {
        let mut shard = self.shard(key).write().await;
        if let Some(entry) = shard.get_mut(key) {
            let before = entry.size_bytes();
            entry.remove(&DirectoryInfo::new(from));
            entry.add(DirectoryInfo::new(to), DirectoryMetadata::new(false));
            let after = entry.size_bytes();
            if after > before {
                self.size_bytes.fetch_add(after - before, Ordering::Relaxed);
            } else {
                self.size_bytes.fetch_sub(before - after, Ordering::Relaxed);
            }
        }
    }

    /// Remove the listed facts for the given edges (post-invalidation
    /// cleanup: those copies were dropped by their owners).
    pub async fn remove_edges(&self, key: &Key, edges: &DirinfoSet) {
        let mut shard = self.shard(key).write().await;
        if let Some(entry) = shard.get_mut(key) {
            let before = entry.size_bytes();
            for info in edges.infos() {
                entry.remove(info);
            }
            self.size_bytes
                .fetch_sub(before - entry.size_bytes(), Ordering::Relaxed);
            if entry.is_empty() {
                shard.remove(key);
                self.size_bytes.fetch_sub(key.len_bytes(), Ordering::Relaxed);
            }
        }
    }

    /// Capacity accounting: key bytes + entry bytes across all shards.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}

/// Beacon-side write guard: at most one writer per key. While held, the
/// key counts as "being written" and every reader is routed to the cloud.
pub struct WritelockTable {
    writers: Mutex<HashMap<Key, EdgeIdx>>,
    /// Grant requests currently being serviced, keyed by (key, writer).
    /// Retransmitted acquires must not spawn a second grant cycle.
    grants_in_flight: Mutex<HashSet<(Key, EdgeIdx)>>,
    released: Notify,
}

impl Default for WritelockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WritelockTable {
    /// Poll interval while waiting for a contended write lock.
    const ACQUIRE_POLL: Duration = Duration::from_millis(20);

    pub fn new() -> Self {
        Self {
            writers: Mutex::new(HashMap::new()),
            grants_in_flight: Mutex::new(HashSet::new()),
            released: Notify::new(),
        }
    }

    pub fn is_being_written(&self, key: &Key) -> bool {
        self.writers.lock().expect("writelock table poisoned").contains_key(key)
    }

    /// Re-entrant for the same writer: a retransmitted acquire while the
    /// grant is held must not deadlock or double-lock.
    pub fn try_acquire(&self, key: &Key, writer: EdgeIdx) -> bool {
        let mut writers = self.writers.lock().expect("writelock table poisoned");
        if let Some(&holder) = writers.get(key) {
            return holder == writer;
        }
        writers.insert(key.clone(), writer);
        true
    }

    /// Begin servicing a grant request; false when a grant cycle for the
    /// same (key, writer) is already running (duplicate request).
    pub fn begin_grant(&self, key: &Key, writer: EdgeIdx) -> bool {
        self.grants_in_flight
            .lock()
            .expect("writelock table poisoned")
            .insert((key.clone(), writer))
    }

    pub fn end_grant(&self, key: &Key, writer: EdgeIdx) {
        self.grants_in_flight
            .lock()
            .expect("writelock table poisoned")
            .remove(&(key.clone(), writer));
    }

    /// Wait until the key's write lock can be granted to `writer`.
    /// Returns false only when the node stops running first.
    pub async fn acquire(&self, key: &Key, writer: EdgeIdx, running: &AtomicBool) -> bool {
        loop {
            if self.try_acquire(key, writer) {
                return true;
            }
            if !running.load(Ordering::Acquire) {
                return false;
            }
            let notified = self.released.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Self::ACQUIRE_POLL) => {}
            }
        }
    }

    pub fn release(&self, key: &Key) {
        let removed = self
            .writers
            .lock()
            .expect("writelock table poisoned")
            .remove(key);
        if removed.is_none() {
            // A retransmitted finish-block releases twice; ignore.
            tracing::warn!(key = %key, "duplicate write lock release ignored");
        }
        self.released.notify_waiters();
    }

    /// Keys currently locked (diagnostics).
    pub fn locked_keys(&self) -> HashSet<Key> {
        self.writers
            .lock()
            .expect("writelock table poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn table() -> DirectoryTable {
        DirectoryTable::new(8, Arc::new(WritelockTable::new()))
    }

    #[tokio::test]
    async fn test_admit_then_lookup_valid() {
        let t = table();
        let key = Key::from("k");
        assert!(!t.update(&key, 3, true).await);
        let out = t.lookup(&key).await;
        assert!(out.valid_exists);
        assert_eq!(out.dirinfo, Some(DirectoryInfo::new(3)));
        assert!(!out.is_being_written);
    }

    #[tokio::test]
    async fn test_evict_last_edge_removes_entry_and_bytes() {
        let t = table();
        let key = Key::from("k");
        t.update(&key, 1, true).await;
        assert!(t.size_bytes() > 0);
        t.update(&key, 1, false).await;
        assert_eq!(t.size_bytes(), 0);
        assert!(!t.lookup(&key).await.valid_exists);
    }

    #[tokio::test]
    async fn test_invalidate_all_then_revalidate() {
        let t = table();
        let key = Key::from("k");
        t.update(&key, 0, true).await;
        t.update(&key, 1, true).await;

        let listed = t.invalidate_all(&key).await;
        assert_eq!(listed.len(), 2);
        assert!(!t.lookup(&key).await.valid_exists);

        t.revalidate(&key, 1).await;
        let out = t.lookup(&key).await;
        assert!(out.valid_exists);
        assert_eq!(out.dirinfo, Some(DirectoryInfo::new(1)));
    }

    #[tokio::test]
    async fn test_preserve_only_when_unmapped() {
        let t = table();
        let key = Key::from("k");
        assert!(t.preserve_if_unmapped(&key, 2).await);
        // Reservation exists (invalid), so a second preserve fails.
        assert!(!t.preserve_if_unmapped(&key, 4).await);
        // The reservation is invalid: lookups must not route reads to it.
        assert!(!t.lookup(&key).await.valid_exists);
    }

    #[tokio::test]
    async fn test_writelock_exclusion() {
        let wl = Arc::new(WritelockTable::new());
        let key = Key::from("k");
        assert!(wl.try_acquire(&key, 0));
        assert!(!wl.try_acquire(&key, 1));
        wl.release(&key);
        assert!(wl.try_acquire(&key, 1));
    }

    #[tokio::test]
    async fn test_lookup_reports_being_written() {
        let wl = Arc::new(WritelockTable::new());
        let t = DirectoryTable::new(8, wl.clone());
        let key = Key::from("k");
        t.update(&key, 0, true).await;
        assert!(wl.try_acquire(&key, 5));
        assert!(t.lookup(&key).await.is_being_written);
        wl.release(&key);
        assert!(!t.lookup(&key).await.is_being_written);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let wl = Arc::new(WritelockTable::new());
        let running = Arc::new(AtomicBool::new(true));
        let key = Key::from("k");
        assert!(wl.try_acquire(&key, 0));

        let wl2 = wl.clone();
        let running2 = running.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move { wl2.acquire(&key2, 1, &running2).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        wl.release(&key);
        assert!(waiter.await.unwrap());
    }
}
