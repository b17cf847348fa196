//! Per-key directory entries: edge → validity metadata.

use super::dirinfo::{DirectoryInfo, DirinfoSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Validity bit for one directory info. Invalid means the edge was
/// announced but its copy is temporarily stale (a writer is in progress or
/// has just invalidated it); lookups must not route reads there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMetadata {
    is_valid: bool,
}

impl DirectoryMetadata {
    /// Wire footprint of one metadata (one boolean).
    pub const WIRE_SIZE: u64 = 1;

    pub fn new(is_valid: bool) -> Self {
        Self { is_valid }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn validate(&mut self) {
        self.is_valid = true;
    }

    pub fn invalidate(&mut self) {
        self.is_valid = false;
    }
}

/// All directory facts for a single key: at most one metadata per edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    infos: BTreeMap<DirectoryInfo, DirectoryMetadata>,
}

impl DirectoryEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One arbitrary valid directory info, if any. BTreeMap order makes
    /// the pick deterministic.
    pub fn first_valid(&self) -> Option<DirectoryInfo> {
        self.infos
            .iter()
            .find(|(_, meta)| meta.is_valid())
            .map(|(info, _)| *info)
    }

    pub fn has_valid(&self) -> bool {
        self.infos.values().any(|meta| meta.is_valid())
    }

    /// Insert or overwrite the metadata for an edge.
    /// Returns whether the edge was already listed.
    pub fn add(&mut self, info: DirectoryInfo, metadata: DirectoryMetadata) -> bool {
        self.infos.insert(info, metadata).is_some()
    }

    /// Remove an edge's fact. Returns whether it was listed.
    pub fn remove(&mut self, info: &DirectoryInfo) -> bool {
        self.infos.remove(info).is_some()
    }

    pub fn contains(&self, info: &DirectoryInfo) -> bool {
        self.infos.contains_key(info)
    }

    /// Flip every existing metadata to invalid (never adds new facts).
    /// Returns the complete set of listed infos for invalidation fan-out.
    pub fn invalidate_all(&mut self) -> DirinfoSet {
        for meta in self.infos.values_mut() {
            meta.invalidate();
        }
        self.all_dirinfos()
    }

    /// Validate the metadata for an edge only if the edge is listed.
    pub fn validate_if_exists(&mut self, info: &DirectoryInfo) {
        if let Some(meta) = self.infos.get_mut(info) {
            meta.validate();
        }
    }

    pub fn all_dirinfos(&self) -> DirinfoSet {
        DirinfoSet::complete(self.infos.keys().copied())
    }

    pub fn valid_dirinfos(&self) -> DirinfoSet {
        DirinfoSet::complete(
            self.infos
                .iter()
                .filter(|(_, meta)| meta.is_valid())
                .map(|(info, _)| *info),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Capacity footprint: every info plus its metadata.
    pub fn size_bytes(&self) -> u64 {
        self.infos.len() as u64 * (DirectoryInfo::WIRE_SIZE + DirectoryMetadata::WIRE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_overwrites_single_fact_per_edge() {
        let mut entry = DirectoryEntry::new();
        let e1 = DirectoryInfo::new(1);
        assert!(!entry.add(e1, DirectoryMetadata::new(false)));
        assert!(entry.add(e1, DirectoryMetadata::new(true)));
        assert_eq!(entry.len(), 1);
        assert_eq!(entry.first_valid(), Some(e1));
    }

    #[test]
    fn test_invalidate_then_revalidate_one() {
        let mut entry = DirectoryEntry::new();
        let e1 = DirectoryInfo::new(1);
        let e2 = DirectoryInfo::new(2);
        entry.add(e1, DirectoryMetadata::new(true));
        entry.add(e2, DirectoryMetadata::new(true));

        let all = entry.invalidate_all();
        assert_eq!(all.len(), 2);
        assert!(!entry.has_valid());

        entry.validate_if_exists(&e2);
        assert_eq!(entry.first_valid(), Some(e2));
        // Revalidation never changes the set of listed infos.
        assert_eq!(entry.all_dirinfos(), all);
    }

    #[test]
    fn test_validate_missing_edge_adds_nothing() {
        let mut entry = DirectoryEntry::new();
        entry.validate_if_exists(&DirectoryInfo::new(9));
        assert!(entry.is_empty());
    }

    #[test]
    fn test_size_accounting_tracks_membership() {
        let mut entry = DirectoryEntry::new();
        assert_eq!(entry.size_bytes(), 0);
        entry.add(DirectoryInfo::new(0), DirectoryMetadata::new(true));
        entry.add(DirectoryInfo::new(1), DirectoryMetadata::new(true));
        assert_eq!(
            entry.size_bytes(),
            2 * (DirectoryInfo::WIRE_SIZE + DirectoryMetadata::WIRE_SIZE)
        );
        entry.remove(&DirectoryInfo::new(0));
        assert_eq!(
            entry.size_bytes(),
            DirectoryInfo::WIRE_SIZE + DirectoryMetadata::WIRE_SIZE
        );
    }
}
