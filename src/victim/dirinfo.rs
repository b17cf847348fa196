//! Per-key victim records.

use crate::directory::DirinfoSet;
use crate::types::{EdgeIdx, Key};
use serde::{Deserialize, Serialize};

/// Locally tracked record of one eviction candidate: which edge beacons
/// the key, and the complete set of edges caching it as last synced.
///
/// Dirinfo sets stored locally are always complete; only transmitted sets
/// are ever compressed. The refcount counts how many tracking sources
/// (local victim nomination, neighbor syncsets being merged) currently
/// reference the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VictimDirinfo {
    refcnt: u32,
    beacon_edge_idx: EdgeIdx,
    dirinfos: DirinfoSet,
}

impl VictimDirinfo {
    pub fn new(beacon_edge_idx: EdgeIdx, dirinfos: DirinfoSet) -> Self {
        debug_assert!(dirinfos.is_complete());
        Self {
            refcnt: 1,
            beacon_edge_idx,
            dirinfos,
        }
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt
    }

    pub fn incr_refcnt(&mut self) {
        self.refcnt += 1;
    }

    /// Returns true when the record dropped to zero references.
    pub fn decr_refcnt(&mut self) -> bool {
        debug_assert!(self.refcnt > 0);
        self.refcnt = self.refcnt.saturating_sub(1);
        self.refcnt == 0
    }

    pub fn beacon_edge_idx(&self) -> EdgeIdx {
        self.beacon_edge_idx
    }

    pub fn dirinfos(&self) -> &DirinfoSet {
        &self.dirinfos
    }

    pub fn set_dirinfos(&mut self, dirinfos: DirinfoSet) {
        debug_assert!(dirinfos.is_complete());
        self.dirinfos = dirinfos;
    }

    /// Add or remove one edge from the record's dirinfo set.
    /// Returns whether the set changed.
    pub fn update_dirinfos(&mut self, is_admit: bool, edge: crate::directory::DirectoryInfo) -> bool {
        if is_admit {
            self.dirinfos.insert(edge)
        } else {
            self.dirinfos.remove(&edge)
        }
    }

    pub fn size_bytes(&self) -> u64 {
        4 + 4 + self.dirinfos.wire_size()
    }
}

/// Wire form of one victim fact inside a syncset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictimRecord {
    pub key: Key,
    pub beacon_edge_idx: EdgeIdx,
    pub dirinfos: DirinfoSet,
}

impl VictimRecord {
    pub fn new(key: Key, beacon_edge_idx: EdgeIdx, dirinfos: DirinfoSet) -> Self {
        debug_assert!(dirinfos.is_complete());
        Self {
            key,
            beacon_edge_idx,
            dirinfos,
        }
    }

    pub fn wire_size(&self) -> u64 {
        self.key.len_bytes() + 4 + self.dirinfos.wire_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryInfo;

    #[test]
    fn test_refcnt_lifecycle() {
        let mut v = VictimDirinfo::new(0, DirinfoSet::empty());
        assert_eq!(v.refcnt(), 1);
        v.incr_refcnt();
        assert!(!v.decr_refcnt());
        assert!(v.decr_refcnt());
    }

    #[test]
    fn test_update_dirinfos() {
        let mut v = VictimDirinfo::new(0, DirinfoSet::empty());
        assert!(v.update_dirinfos(true, DirectoryInfo::new(2)));
        assert!(!v.update_dirinfos(true, DirectoryInfo::new(2)));
        assert!(v.update_dirinfos(false, DirectoryInfo::new(2)));
        assert!(v.dirinfos().is_empty());
    }
}
