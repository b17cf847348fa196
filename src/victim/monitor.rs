//! Sequence-based victim synchronization monitor, one per neighbor.
//!
//! The sender half numbers outgoing syncsets and delta-compresses them
//! against the last transmitted complete set. The receiver half installs
//! complete sets, applies strictly-ordered deltas, caches a bounded number
//! of out-of-order deltas, and asks the neighbor to reset and send a
//! complete set when the cache fills before the gap closes
//! (`enforce_complete` on the next outbound syncset).

use super::dirinfo::VictimRecord;
use super::syncset::VictimSyncset;
use crate::types::SeqNum;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct VictimsyncMonitor {
    // Sender half.
    cur_seqnum: SeqNum,
    prev_complete: Option<VictimSyncset>,
    pregen: Option<(VictimSyncset, Option<VictimSyncset>)>,
    /// The peer asked us to abandon delta state and send complete.
    enforce_requested: bool,

    // Receiver half.
    tracked_seqnum: SeqNum,
    installed: Option<VictimSyncset>,
    cached: BTreeMap<SeqNum, VictimSyncset>,
    cache_capacity: usize,
    enforcement_seqnum: SeqNum,
    waiting_complete: bool,
    need_enforcement: bool,
}

impl VictimsyncMonitor {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cur_seqnum: 0,
            prev_complete: None,
            pregen: None,
            enforce_requested: false,
            tracked_seqnum: 0,
            installed: None,
            cached: BTreeMap::new(),
            cache_capacity,
            enforcement_seqnum: 0,
            waiting_complete: false,
            need_enforcement: false,
        }
    }

    // --- sender half ---

    pub fn cur_seqnum(&self) -> SeqNum {
        self.cur_seqnum
    }

    /// Pre-generate the complete+compressed pair for the next send, so the
    /// hot path can reuse it when the victim set has not changed since.
    pub fn pregenerate(&mut self, records: Vec<VictimRecord>) {
        let seq = self.cur_seqnum + 1;
        let complete = VictimSyncset::complete(seq, records);
        let compressed = match (&self.prev_complete, self.enforce_requested) {
            (Some(prev), false) => Some(VictimSyncset::compress(&complete, prev)),
            _ => None,
        };
        self.pregen = Some((complete, compressed));
    }

    /// Produce the syncset to piggyback on the next message to this
    /// neighbor: advances the sequence number, compresses against the last
    /// transmitted complete set (unless the peer enforced a reset), and
    /// carries our own enforcement request if one is pending.
    pub fn next_outbound(&mut self, records: Vec<VictimRecord>) -> VictimSyncset {
        self.cur_seqnum += 1;

        let (complete, compressed) = match self.pregen.take() {
            Some((complete, compressed))
                if complete.seqnum == self.cur_seqnum
                    && complete.records() == records.as_slice() =>
            {
                (complete, compressed)
            }
            _ => {
                let complete = VictimSyncset::complete(self.cur_seqnum, records);
                let compressed = match (&self.prev_complete, self.enforce_requested) {
                    (Some(prev), false) => Some(VictimSyncset::compress(&complete, prev)),
                    _ => None,
                };
                (complete, compressed)
            }
        };

        let mut out = compressed.unwrap_or_else(|| complete.clone());
        self.enforce_requested = false;
        self.prev_complete = Some(complete);

        if self.need_enforcement {
            out.enforce_complete = true;
            self.need_enforcement = false;
        }
        out
    }

    // --- receiver half ---

    pub fn tracked_seqnum(&self) -> SeqNum {
        self.tracked_seqnum
    }

    pub fn needs_enforcement(&self) -> bool {
        self.need_enforcement
    }

    /// Ingest a syncset from the neighbor. Returns the reconstructed
    /// complete states in order; the caller installs the last one into the
    /// victim tracker.
    pub fn on_receive(&mut self, syncset: VictimSyncset) -> Vec<VictimSyncset> {
        if syncset.enforce_complete {
            // The peer could not recover our deltas: reset sender state so
            // the next outbound syncset is complete.
            self.enforce_requested = true;
            self.prev_complete = None;
            self.pregen = None;
        }

        if syncset.is_complete() {
            self.receive_complete(syncset)
        } else {
            self.receive_compressed(syncset)
        }
    }

    fn receive_complete(&mut self, syncset: VictimSyncset) -> Vec<VictimSyncset> {
        if self.installed.is_some() && syncset.seqnum <= self.tracked_seqnum {
            return Vec::new(); // stale retransmission
        }

        if self.waiting_complete && syncset.seqnum > self.enforcement_seqnum {
            self.waiting_complete = false;
            self.need_enforcement = false;
        }

        self.tracked_seqnum = syncset.seqnum;
        self.installed = Some(syncset.clone());
        let mut states = vec![syncset];
        states.extend(self.drain_contiguous());
        states
    }

    fn receive_compressed(&mut self, syncset: VictimSyncset) -> Vec<VictimSyncset> {
        if self.installed.is_some() && syncset.seqnum <= self.tracked_seqnum {
            return Vec::new();
        }
        if self.waiting_complete {
            // Already enforcing; deltas are useless until the reset lands.
            return Vec::new();
        }

        let applicable =
            self.installed.is_some() && syncset.seqnum == self.tracked_seqnum + 1;
        if applicable {
            let recovered = syncset.recover(self.installed.as_ref().expect("checked above"));
            self.tracked_seqnum = recovered.seqnum;
            self.installed = Some(recovered.clone());
            let mut states = vec![recovered];
            states.extend(self.drain_contiguous());
            return states;
        }

        // Out of order: cache it, bounded. A full cache means the gap is
        // not going to close; enforce a complete resend.
        if self.cached.len() >= self.cache_capacity {
            let max_cached = self.cached.keys().next_back().copied().unwrap_or(0);
            self.enforcement_seqnum = max_cached.max(syncset.seqnum);
            self.need_enforcement = true;
            self.waiting_complete = true;
            self.cached.clear();
        } else {
            self.cached.insert(syncset.seqnum, syncset);
        }
        Vec::new()
    }

    /// Apply cached deltas that became contiguous with the tracked state.
    fn drain_contiguous(&mut self) -> Vec<VictimSyncset> {
        let mut states = Vec::new();
        // Drop anything at or below the tracked seqnum first.
        let tracked = self.tracked_seqnum;
        self.cached.retain(|&seq, _| seq > tracked);

        while let Some(next) = self.cached.remove(&(self.tracked_seqnum + 1)) {
            let recovered = next.recover(self.installed.as_ref().expect("installed state exists"));
            self.tracked_seqnum = recovered.seqnum;
            self.installed = Some(recovered.clone());
            states.push(recovered);
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryInfo, DirinfoSet};
    use crate::types::Key;

    fn record(key: &str, edges: &[u32]) -> VictimRecord {
        VictimRecord::new(
            Key::from(key),
            0,
            DirinfoSet::complete(edges.iter().map(|&e| DirectoryInfo::new(e))),
        )
    }

    fn keys_of(syncset: &VictimSyncset) -> Vec<Key> {
        let mut keys: Vec<Key> = syncset.records().iter().map(|r| r.key.clone()).collect();
        keys.sort();
        keys
    }

    /// Drive a sender monitor to produce the syncset stream for a given
    /// series of victim sets.
    fn sender_stream(sets: &[Vec<VictimRecord>]) -> (VictimsyncMonitor, Vec<VictimSyncset>) {
        let mut sender = VictimsyncMonitor::new(8);
        let stream = sets
            .iter()
            .map(|records| sender.next_outbound(records.clone()))
            .collect();
        (sender, stream)
    }

    #[test]
    fn test_first_outbound_is_complete_then_deltas() {
        let (_, stream) = sender_stream(&[
            vec![record("a", &[0])],
            vec![record("a", &[0]), record("b", &[1])],
        ]);
        assert!(stream[0].is_complete());
        assert!(!stream[1].is_complete());
        assert_eq!(stream[0].seqnum, 1);
        assert_eq!(stream[1].seqnum, 2);
    }

    #[test]
    fn test_in_order_delivery_reconstructs_every_state() {
        let sets = vec![
            vec![record("a", &[0])],
            vec![record("b", &[1])],
            vec![record("b", &[1]), record("c", &[2])],
        ];
        let (_, stream) = sender_stream(&sets);
        let mut receiver = VictimsyncMonitor::new(8);
        let mut installed = Vec::new();
        for syncset in stream {
            installed.extend(receiver.on_receive(syncset));
        }
        assert_eq!(installed.len(), 3);
        assert_eq!(keys_of(&installed[2]), vec![Key::from("b"), Key::from("c")]);
        assert_eq!(receiver.tracked_seqnum(), 3);
    }

    /// Out-of-order compressed syncsets are cached and drained once the
    /// gap closes; no enforcement is requested.
    #[test]
    fn test_reorder_recovers_without_enforcement() {
        let sets = vec![
            vec![record("a", &[0])],                     // seq 1 complete
            vec![record("a", &[0]), record("b", &[1])],  // seq 2 delta
            vec![record("b", &[1]), record("c", &[2])],  // seq 3 delta
        ];
        let (_, stream) = sender_stream(&sets);
        let mut receiver = VictimsyncMonitor::new(8);

        let mut installed = receiver.on_receive(stream[0].clone());
        // seq 3 arrives before seq 2: cached.
        assert!(receiver.on_receive(stream[2].clone()).is_empty());
        // seq 2 closes the gap: both states come out, in order.
        installed.extend(receiver.on_receive(stream[1].clone()));

        assert_eq!(installed.len(), 3);
        assert_eq!(installed[1].seqnum, 2);
        assert_eq!(installed[2].seqnum, 3);
        assert_eq!(keys_of(&installed[2]), vec![Key::from("b"), Key::from("c")]);
        assert!(!receiver.needs_enforcement());
    }

    /// A lost delta plus a full out-of-order cache forces enforcement: the
    /// receiver flags its next outbound syncset, the sender resets, and the
    /// following complete set clears the enforcement state.
    #[test]
    fn test_lost_delta_enforces_complete_resend() {
        let sets = vec![
            vec![record("a", &[0])],                     // seq 1 complete
            vec![record("b", &[1])],                     // seq 2 delta (lost)
            vec![record("c", &[2])],                     // seq 3 delta
            vec![record("c", &[2]), record("d", &[3])],  // seq 4 delta
        ];
        let (mut sender, stream) = sender_stream(&sets);
        let mut receiver = VictimsyncMonitor::new(1);

        receiver.on_receive(stream[0].clone());
        // seq 2 lost; seq 3 cached (capacity 1).
        assert!(receiver.on_receive(stream[2].clone()).is_empty());
        assert!(!receiver.needs_enforcement());
        // seq 4 overflows the cache: enforcement requested.
        assert!(receiver.on_receive(stream[3].clone()).is_empty());
        assert!(receiver.needs_enforcement());

        // The receiver's own next outbound syncset carries the flag.
        let outbound = receiver.next_outbound(vec![record("x", &[0])]);
        assert!(outbound.enforce_complete);
        assert!(!receiver.needs_enforcement());

        // The sender sees the flag, resets, and answers complete.
        sender.on_receive(outbound);
        let reset = sender.next_outbound(vec![record("e", &[4])]);
        assert!(reset.is_complete());
        assert_eq!(reset.seqnum, 5);

        // Installing it clears the enforcement wait.
        let installed = receiver.on_receive(reset);
        assert_eq!(installed.len(), 1);
        assert_eq!(receiver.tracked_seqnum(), 5);
        assert!(!receiver.needs_enforcement());

        // Delta compression resumes from the new checkpoint.
        let next = sender.next_outbound(vec![record("e", &[4]), record("f", &[5])]);
        assert!(!next.is_complete());
        let installed = receiver.on_receive(next);
        assert_eq!(installed.len(), 1);
        assert_eq!(
            keys_of(&installed[0]),
            vec![Key::from("e"), Key::from("f")]
        );
    }

    #[test]
    fn test_stale_retransmission_ignored() {
        let (_, stream) = sender_stream(&[vec![record("a", &[0])], vec![record("b", &[1])]]);
        let mut receiver = VictimsyncMonitor::new(8);
        receiver.on_receive(stream[0].clone());
        receiver.on_receive(stream[1].clone());
        assert!(receiver.on_receive(stream[0].clone()).is_empty());
        assert_eq!(receiver.tracked_seqnum(), 2);
    }

    #[test]
    fn test_pregenerated_pair_used_when_unchanged() {
        let mut sender = VictimsyncMonitor::new(8);
        sender.next_outbound(vec![record("a", &[0])]);
        let records = vec![record("a", &[0]), record("b", &[1])];
        sender.pregenerate(records.clone());
        let out = sender.next_outbound(records);
        assert!(!out.is_complete());
        assert_eq!(out.seqnum, 2);
    }
}
