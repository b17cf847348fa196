//! Per-edge victim state: local nominations plus each neighbor's synced
//! victim view.

use super::dirinfo::{VictimDirinfo, VictimRecord};
use crate::directory::DirinfoSet;
use crate::types::{EdgeIdx, Key};
use std::collections::HashMap;

/// Tracks this edge's own eviction candidates (refcounted) and, for every
/// neighbor, the last installed complete victim view.
#[derive(Debug, Default)]
pub struct VictimTracker {
    local: HashMap<Key, VictimDirinfo>,
    neighbors: HashMap<EdgeIdx, HashMap<Key, VictimRecord>>,
}

impl VictimTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nominate (or re-reference) a local eviction candidate.
    pub fn add_local_victim(&mut self, key: Key, beacon_edge_idx: EdgeIdx, dirinfos: DirinfoSet) {
        debug_assert!(dirinfos.is_complete());
        match self.local.get_mut(&key) {
            Some(existing) => {
                existing.incr_refcnt();
                existing.set_dirinfos(dirinfos);
            }
            None => {
                self.local
                    .insert(key, VictimDirinfo::new(beacon_edge_idx, dirinfos));
            }
        }
    }

    /// Drop one reference to a local candidate; the record disappears when
    /// nothing references it anymore.
    pub fn remove_local_victim(&mut self, key: &Key) {
        let gone = match self.local.get_mut(key) {
            Some(record) => record.decr_refcnt(),
            None => false,
        };
        if gone {
            self.local.remove(key);
        }
    }

    /// The current local victim set, in wire form for a syncset.
    pub fn local_records(&self, limit: usize) -> Vec<VictimRecord> {
        let mut records: Vec<VictimRecord> = self
            .local
            .iter()
            .map(|(key, v)| VictimRecord::new(key.clone(), v.beacon_edge_idx(), v.dirinfos().clone()))
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records.truncate(limit);
        records
    }

    /// Install a neighbor's complete victim view.
    pub fn install_neighbor(&mut self, edge: EdgeIdx, records: &[VictimRecord]) {
        let view = self.neighbors.entry(edge).or_default();
        view.clear();
        for record in records {
            view.insert(record.key.clone(), record.clone());
        }
    }

    /// Does any synced neighbor currently nominate this key as a victim?
    pub fn neighbors_nominating(&self, key: &Key) -> Vec<EdgeIdx> {
        self.neighbors
            .iter()
            .filter(|(_, view)| view.contains_key(key))
            .map(|(&edge, _)| edge)
            .collect()
    }

    /// Neighbors whose victims are "covered": their candidate has at least
    /// one other cached copy in the cluster, so evicting there is cheap.
    pub fn covered_victim_counts(&self) -> Vec<(EdgeIdx, usize)> {
        self.neighbors
            .iter()
            .map(|(&edge, view)| {
                let covered = view
                    .values()
                    .filter(|record| record.dirinfos.len() > 1)
                    .count();
                (edge, covered)
            })
            .collect()
    }

    pub fn neighbor_view(&self, edge: EdgeIdx) -> Option<&HashMap<Key, VictimRecord>> {
        self.neighbors.get(&edge)
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    pub fn size_bytes(&self) -> u64 {
        let local: u64 = self
            .local
            .iter()
            .map(|(key, v)| key.len_bytes() + v.size_bytes())
            .sum();
        let synced: u64 = self
            .neighbors
            .values()
            .flat_map(|view| view.values())
            .map(|record| record.wire_size())
            .sum();
        local + synced
    }
}
