//! Victim syncsets: per-neighbor batches of victim records.

use super::dirinfo::VictimRecord;
use crate::types::{Key, SeqNum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete or delta-compressed batch body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncsetPayload {
    /// The sender's full current victim set.
    Complete(Vec<VictimRecord>),
    /// Changes relative to the previously transmitted complete set.
    Compressed {
        /// Records added or whose dirinfo sets changed.
        new_records: Vec<VictimRecord>,
        /// Keys no longer in the victim set.
        stale_keys: Vec<Key>,
    },
}

/// One victim synchronization unit from a sender edge to one neighbor.
///
/// Sequence numbers are monotone per (sender, receiver); delta recovery
/// requires the receiver to hold the strict predecessor. The
/// `enforce_complete` flag is the *emitter's* request that its peer reset
/// delta state and answer with a complete syncset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictimSyncset {
    pub seqnum: SeqNum,
    pub enforce_complete: bool,
    pub payload: SyncsetPayload,
}

impl VictimSyncset {
    pub fn complete(seqnum: SeqNum, records: Vec<VictimRecord>) -> Self {
        Self {
            seqnum,
            enforce_complete: false,
            payload: SyncsetPayload::Complete(records),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.payload, SyncsetPayload::Complete(_))
    }

    /// The complete records. Panics on a compressed set: installed state
    /// must always be complete, so this is a programming bug.
    pub fn records(&self) -> &[VictimRecord] {
        match &self.payload {
            SyncsetPayload::Complete(records) => records,
            SyncsetPayload::Compressed { .. } => {
                unreachable!("compressed syncset used where a complete one is required")
            }
        }
    }

    /// Delta-compress `current` against `previous` (both complete, with
    /// `current.seqnum > previous.seqnum`).
    pub fn compress(current: &VictimSyncset, previous: &VictimSyncset) -> VictimSyncset {
        debug_assert!(current.seqnum > previous.seqnum);
        let prev: BTreeMap<&Key, &VictimRecord> =
            previous.records().iter().map(|r| (&r.key, r)).collect();
        let cur: BTreeMap<&Key, &VictimRecord> =
            current.records().iter().map(|r| (&r.key, r)).collect();

        let new_records = cur
            .iter()
            .filter(|(key, record)| prev.get(*key) != Some(record))
            .map(|(_, record)| (*record).clone())
            .collect();
        let stale_keys = prev
            .keys()
            .filter(|key| !cur.contains_key(*key))
            .map(|key| (*key).clone())
            .collect();

        VictimSyncset {
            seqnum: current.seqnum,
            enforce_complete: false,
            payload: SyncsetPayload::Compressed {
                new_records,
                stale_keys,
            },
        }
    }

    /// Recover the complete syncset at this sequence number by applying a
    /// compressed body onto the previously installed complete set.
    pub fn recover(&self, previous: &VictimSyncset) -> VictimSyncset {
        match &self.payload {
            SyncsetPayload::Complete(_) => self.clone(),
            SyncsetPayload::Compressed {
                new_records,
                stale_keys,
            } => {
                let mut merged: BTreeMap<Key, VictimRecord> = previous
                    .records()
                    .iter()
                    .map(|r| (r.key.clone(), r.clone()))
                    .collect();
                for key in stale_keys {
                    merged.remove(key);
                }
                for record in new_records {
                    merged.insert(record.key.clone(), record.clone());
                }
                VictimSyncset::complete(self.seqnum, merged.into_values().collect())
            }
        }
    }

    pub fn wire_size(&self) -> u64 {
        // seqnum + flag + complete/compressed bitmap
        let mut size = 8 + 1 + 1;
        match &self.payload {
            SyncsetPayload::Complete(records) => {
                size += 4;
                size += records.iter().map(|r| r.wire_size()).sum::<u64>();
            }
            SyncsetPayload::Compressed {
                new_records,
                stale_keys,
            } => {
                size += 4;
                size += new_records.iter().map(|r| r.wire_size()).sum::<u64>();
                size += 4;
                size += stale_keys.iter().map(|k| k.len_bytes()).sum::<u64>();
            }
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryInfo, DirinfoSet};

    fn record(key: &str, beacon: u32, edges: &[u32]) -> VictimRecord {
        VictimRecord::new(
            Key::from(key),
            beacon,
            DirinfoSet::complete(edges.iter().map(|&e| DirectoryInfo::new(e))),
        )
    }

    fn sorted(mut records: Vec<VictimRecord>) -> Vec<VictimRecord> {
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    #[test]
    fn test_compress_recover_round_trip() {
        let prev = VictimSyncset::complete(5, vec![record("a", 0, &[0]), record("b", 1, &[1])]);
        let cur = VictimSyncset::complete(
            6,
            vec![record("b", 1, &[1, 2]), record("c", 0, &[2])],
        );
        let compressed = VictimSyncset::compress(&cur, &prev);
        assert!(!compressed.is_complete());

        let recovered = compressed.recover(&prev);
        assert_eq!(recovered.seqnum, 6);
        assert_eq!(sorted(recovered.records().to_vec()), sorted(cur.records().to_vec()));
    }

    #[test]
    fn test_unchanged_records_not_retransmitted() {
        let prev = VictimSyncset::complete(1, vec![record("a", 0, &[0]), record("b", 0, &[0])]);
        let cur = VictimSyncset::complete(2, vec![record("a", 0, &[0]), record("b", 0, &[0])]);
        let compressed = VictimSyncset::compress(&cur, &prev);
        match &compressed.payload {
            SyncsetPayload::Compressed {
                new_records,
                stale_keys,
            } => {
                assert!(new_records.is_empty());
                assert!(stale_keys.is_empty());
            }
            _ => panic!("expected compressed payload"),
        }
    }

    #[test]
    fn test_changed_dirinfo_set_counts_as_new() {
        let prev = VictimSyncset::complete(1, vec![record("a", 0, &[0])]);
        let cur = VictimSyncset::complete(2, vec![record("a", 0, &[0, 3])]);
        let compressed = VictimSyncset::compress(&cur, &prev);
        match &compressed.payload {
            SyncsetPayload::Compressed { new_records, .. } => {
                assert_eq!(new_records.len(), 1);
            }
            _ => panic!("expected compressed payload"),
        }
    }
}
