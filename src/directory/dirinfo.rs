//! Directory infos and dedup-/delta-compressible dirinfo sets.

use crate::types::EdgeIdx;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Names one edge node that caches (or claims to cache) a key.
/// Serialized as a single unsigned 32-bit field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DirectoryInfo {
    edge_idx: EdgeIdx,
}

impl DirectoryInfo {
    /// Wire footprint of one directory info (u32 edge index).
    pub const WIRE_SIZE: u64 = 4;

    pub fn new(edge_idx: EdgeIdx) -> Self {
        Self { edge_idx }
    }

    pub fn edge_idx(&self) -> EdgeIdx {
        self.edge_idx
    }
}

/// A set of directory infos, either complete or delta-compressed against a
/// previously transmitted complete set.
///
/// Sets stored locally (directory table, victim tracker) are always
/// complete; only transmitted sets may be compressed. The one-byte wire
/// bitmap of the framing (complete vs new-delta/stale-delta present) maps
/// onto the enum tag here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirinfoSet {
    Complete(BTreeSet<DirectoryInfo>),
    Compressed {
        /// Infos added since the previous complete set.
        new_delta: BTreeSet<DirectoryInfo>,
        /// Infos removed since the previous complete set.
        stale_delta: BTreeSet<DirectoryInfo>,
    },
}

impl DirinfoSet {
    pub fn empty() -> Self {
        DirinfoSet::Complete(BTreeSet::new())
    }

    pub fn complete(infos: impl IntoIterator<Item = DirectoryInfo>) -> Self {
        DirinfoSet::Complete(infos.into_iter().collect())
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, DirinfoSet::Complete(_))
    }

    pub fn is_compressed(&self) -> bool {
        !self.is_complete()
    }

    /// The complete set of infos. Panics on a compressed set: local state
    /// must never be compressed, so hitting this is a programming bug.
    pub fn infos(&self) -> &BTreeSet<DirectoryInfo> {
        match self {
            DirinfoSet::Complete(set) => set,
            DirinfoSet::Compressed { .. } => {
                unreachable!("compressed dirinfo set used where a complete set is required")
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DirinfoSet::Complete(set) => set.len(),
            DirinfoSet::Compressed {
                new_delta,
                stale_delta,
            } => new_delta.len() + stale_delta.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, info: &DirectoryInfo) -> bool {
        self.infos().contains(info)
    }

    /// Insert into a complete set. Returns whether the info was new.
    pub fn insert(&mut self, info: DirectoryInfo) -> bool {
        match self {
            DirinfoSet::Complete(set) => set.insert(info),
            DirinfoSet::Compressed { .. } => {
                unreachable!("insert into compressed dirinfo set")
            }
        }
    }

    /// Remove from a complete set. Returns whether the info was present.
    pub fn remove(&mut self, info: &DirectoryInfo) -> bool {
        match self {
            DirinfoSet::Complete(set) => set.remove(info),
            DirinfoSet::Compressed { .. } => {
                unreachable!("remove from compressed dirinfo set")
            }
        }
    }

    /// Delta-compress `current` against `previous` (both complete).
    pub fn compress(current: &DirinfoSet, previous: &DirinfoSet) -> DirinfoSet {
        let cur = current.infos();
        let prev = previous.infos();
        DirinfoSet::Compressed {
            new_delta: cur.difference(prev).copied().collect(),
            stale_delta: prev.difference(cur).copied().collect(),
        }
    }

    /// Recover a complete set by applying this (possibly compressed) set
    /// onto the previously agreed complete set.
    pub fn recover(&self, previous: &DirinfoSet) -> DirinfoSet {
        match self {
            DirinfoSet::Complete(_) => self.clone(),
            DirinfoSet::Compressed {
                new_delta,
                stale_delta,
            } => {
                let mut set = previous.infos().clone();
                for info in stale_delta {
                    set.remove(info);
                }
                for info in new_delta {
                    set.insert(*info);
                }
                DirinfoSet::Complete(set)
            }
        }
    }

    /// Byte footprint on the wire: one bitmap byte, then a u32 count plus
    /// the infos per carried set.
    pub fn wire_size(&self) -> u64 {
        let set_size = |n: usize| 4 + n as u64 * DirectoryInfo::WIRE_SIZE;
        match self {
            DirinfoSet::Complete(set) => 1 + set_size(set.len()),
            DirinfoSet::Compressed {
                new_delta,
                stale_delta,
            } => {
                let mut size = 1;
                if !new_delta.is_empty() {
                    size += set_size(new_delta.len());
                }
                if !stale_delta.is_empty() {
                    size += set_size(stale_delta.len());
                }
                size
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(edges: &[u32]) -> DirinfoSet {
        DirinfoSet::complete(edges.iter().map(|&e| DirectoryInfo::new(e)))
    }

    #[test]
    fn test_compress_recover_round_trip() {
        let prev = set(&[0, 1, 2]);
        let cur = set(&[1, 2, 5]);
        let compressed = DirinfoSet::compress(&cur, &prev);
        assert!(compressed.is_compressed());
        assert_eq!(compressed.recover(&prev), cur);
    }

    #[test]
    fn test_compress_identical_sets_is_empty_delta() {
        let a = set(&[3, 4]);
        let compressed = DirinfoSet::compress(&a, &a);
        assert!(compressed.is_empty());
        assert_eq!(compressed.recover(&a), a);
    }

    #[test]
    fn test_recover_of_complete_ignores_previous() {
        let cur = set(&[7]);
        let prev = set(&[0, 1, 2, 3]);
        assert_eq!(cur.recover(&prev), cur);
    }

    #[test]
    fn test_wire_size_compressed_smaller_for_small_delta() {
        let prev = set(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let cur = set(&[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        let compressed = DirinfoSet::compress(&cur, &prev);
        assert!(compressed.wire_size() < cur.wire_size());
    }
}
