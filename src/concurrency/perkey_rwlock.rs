//! Hash-sharded per-key read/write lock.
//!
//! Keys are hashed onto a fixed array of RW locks; every operation on a key
//! (cache access, directory change, cooperation decision) serializes by
//! taking that key's lock in the right mode. Guards are owned so they can
//! be held across awaits. With one shard the structure degrades to a
//! single global RW lock. No lock upgrades.

use crate::hash::SlotHasher;
use crate::types::Key;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

pub struct PerKeyRwLock {
    shards: Vec<Arc<RwLock<()>>>,
    hasher: SlotHasher,
}

impl PerKeyRwLock {
    pub fn new(shard_cnt: usize) -> Self {
        assert!(shard_cnt > 0, "per-key lock needs at least one shard");
        Self {
            shards: (0..shard_cnt).map(|_| Arc::new(RwLock::new(()))).collect(),
            hasher: SlotHasher::new(),
        }
    }

    fn shard(&self, key: &Key) -> Arc<RwLock<()>> {
        self.shards[self.hasher.shard_of(key, self.shards.len())].clone()
    }

    /// Acquire the key's lock in shared mode.
    pub async fn read(&self, key: &Key) -> OwnedRwLockReadGuard<()> {
        self.shard(key).read_owned().await
    }

    /// Acquire the key's lock in exclusive mode.
    pub async fn write(&self, key: &Key) -> OwnedRwLockWriteGuard<()> {
        self.shard(key).write_owned().await
    }

    pub fn shard_cnt(&self) -> usize {
        self.shards.len()
    }
}
