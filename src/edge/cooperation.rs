//! The cooperation wrapper: the only component that issues beacon-bound
//! directory traffic.
//!
//! For keys this edge beacons, operations terminate locally in the
//! directory table; everything else becomes a request/response to the
//! beacon edge with bounded-wait retransmission. Victim syncsets
//! piggyback on the cross-edge responses and are ingested here.

use crate::config::CachePolicy;
use crate::directory::{DirectoryTable, DirinfoSet, LookupOutcome, WritelockTable};
use crate::hash::SlotHasher;
use crate::net::{BestGuessSyncinfo, Envelope, Message, NodeLink};
use crate::types::{EdgeIdx, Key};
use crate::victim::{VictimSyncset, VictimTracker, VictimsyncMonitor};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub struct CooperationWrapper {
    edge_idx: EdgeIdx,
    edgecnt: u32,
    hasher: SlotHasher,
    policy: CachePolicy,
    link: NodeLink,
    directory: Arc<DirectoryTable>,
    writelocks: Arc<WritelockTable>,
    tracker: Arc<tokio::sync::RwLock<VictimTracker>>,
    monitors: Mutex<HashMap<EdgeIdx, VictimsyncMonitor>>,
    victims_per_syncset: usize,
    victim_cache_capacity: usize,
    running: Arc<AtomicBool>,
}

impl CooperationWrapper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        edge_idx: EdgeIdx,
        edgecnt: u32,
        policy: CachePolicy,
        link: NodeLink,
        directory: Arc<DirectoryTable>,
        writelocks: Arc<WritelockTable>,
        tracker: Arc<tokio::sync::RwLock<VictimTracker>>,
        victims_per_syncset: usize,
        victim_cache_capacity: usize,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            edge_idx,
            edgecnt,
            hasher: SlotHasher::new(),
            policy,
            link,
            directory,
            writelocks,
            tracker,
            monitors: Mutex::new(HashMap::new()),
            victims_per_syncset,
            victim_cache_capacity,
            running,
        }
    }

    pub fn beacon_of(&self, key: &Key) -> EdgeIdx {
        self.hasher.beacon_of(key, self.edgecnt)
    }

    pub fn is_beacon(&self, key: &Key) -> bool {
        self.beacon_of(key) == self.edge_idx
    }

    pub fn tracker(&self) -> &Arc<tokio::sync::RwLock<VictimTracker>> {
        &self.tracker
    }

    /// Directory lookup at the key's beacon. `None` is the finish
    /// sentinel: the node stopped while waiting.
    pub async fn lookup_beacon(
        &self,
        key: &Key,
        syncinfo: Option<BestGuessSyncinfo>,
    ) -> Option<LookupOutcome> {
        if self.is_beacon(key) {
            return Some(self.directory.lookup(key).await);
        }
        let beacon = self.beacon_of(key);
        let env = self
            .link
            .request(
                beacon,
                Message::DirectoryLookupReq {
                    key: key.clone(),
                    syncinfo,
                },
                false,
            )
            .await?;
        self.ingest_envelope(&env).await;
        match env.message {
            Message::DirectoryLookupRsp {
                is_being_written,
                valid_exists,
                dirinfo,
                ..
            } => Some(LookupOutcome {
                is_being_written,
                valid_exists,
                dirinfo,
            }),
            other => unreachable!("unexpected response to dirlookup: {}", other.command()),
        }
    }

    /// Announce or withdraw this edge's copy (or any edge's, during
    /// cleanup) at the key's beacon. Returns the being-written flag.
    pub async fn update_beacon(
        &self,
        key: &Key,
        edge_idx: EdgeIdx,
        is_admit: bool,
        syncinfo: Option<BestGuessSyncinfo>,
    ) -> Option<bool> {
        if self.is_beacon(key) {
            return Some(self.directory.update(key, edge_idx, is_admit).await);
        }
        let beacon = self.beacon_of(key);
        let env = self
            .link
            .request(
                beacon,
                Message::DirectoryUpdateReq {
                    key: key.clone(),
                    edge_idx,
                    is_admit,
                    syncinfo,
                },
                false,
            )
            .await?;
        self.ingest_envelope(&env).await;
        match env.message {
            Message::DirectoryUpdateRsp {
                is_being_written, ..
            } => Some(is_being_written),
            other => unreachable!("unexpected response to dirupdate: {}", other.command()),
        }
    }

    /// Atomic compare-and-insert of an invalid reservation, iff the key
    /// has no directory entry at all.
    pub async fn preserve_directory_if_global_uncached(
        &self,
        key: &Key,
        syncinfo: Option<BestGuessSyncinfo>,
    ) -> Option<bool> {
        if self.is_beacon(key) {
            return Some(self.directory.preserve_if_unmapped(key, self.edge_idx).await);
        }
        let beacon = self.beacon_of(key);
        let env = self
            .link
            .request(
                beacon,
                Message::BgplaceDirectoryUpdateReq {
                    key: key.clone(),
                    edge_idx: self.edge_idx,
                    syncinfo,
                },
                false,
            )
            .await?;
        self.ingest_envelope(&env).await;
        match env.message {
            Message::BgplaceDirectoryUpdateRsp { preserved } => Some(preserved),
            other => unreachable!("unexpected response to bgplace update: {}", other.command()),
        }
    }

    /// Acquire the key's write lock at the beacon; the beacon invalidates
    /// the directory and completes the invalidation fan-out before the
    /// grant comes back.
    pub async fn acquire_writelock(
        &self,
        key: &Key,
        syncinfo: Option<BestGuessSyncinfo>,
    ) -> Option<bool> {
        if self.is_beacon(key) {
            return Some(self.prepare_write_at_beacon(key, self.edge_idx).await);
        }
        let beacon = self.beacon_of(key);
        let env = self
            .link
            .request(
                beacon,
                Message::AcquireWritelockReq {
                    key: key.clone(),
                    syncinfo,
                },
                false,
            )
            .await?;
        self.ingest_envelope(&env).await;
        match env.message {
            Message::AcquireWritelockRsp { granted } => Some(granted),
            other => unreachable!("unexpected response to acquirewritelock: {}", other.command()),
        }
    }

    /// Release the write lock; the beacon revalidates the writer's copy
    /// when it kept one.
    pub async fn finish_block(&self, key: &Key, revalidate_edge: Option<EdgeIdx>) -> Option<()> {
        if self.is_beacon(key) {
            if let Some(edge) = revalidate_edge {
                self.directory.revalidate(key, edge).await;
            }
            self.writelocks.release(key);
            return Some(());
        }
        let beacon = self.beacon_of(key);
        let env = self
            .link
            .request(
                beacon,
                Message::FinishBlockReq {
                    key: key.clone(),
                    revalidate_edge,
                },
                false,
            )
            .await?;
        match env.message {
            Message::FinishBlockRsp => Some(()),
            other => unreachable!("unexpected response to finishblock: {}", other.command()),
        }
    }

    /// Beacon-side write preparation: grant the write lock, flip every
    /// listed metadata invalid, fan the invalidation out to every caching
    /// edge except the writer, and wait for all of them before returning.
    pub async fn prepare_write_at_beacon(&self, key: &Key, writer: EdgeIdx) -> bool {
        if !self.writelocks.acquire(key, writer, &self.running).await {
            return false; // shutdown while contending
        }
        let listed = self.directory.invalidate_all(key).await;
        let mut dropped = DirinfoSet::empty();
        for info in listed.infos() {
            if info.edge_idx() == writer {
                continue;
            }
            match self
                .link
                .request(
                    info.edge_idx(),
                    Message::InvalidationReq { key: key.clone() },
                    false,
                )
                .await
            {
                Some(_) => {
                    dropped.insert(*info);
                }
                None => {
                    warn!(key = %key, edge = info.edge_idx(), "invalidation lost to shutdown");
                }
            }
        }
        // Invalidated copies no longer serve reads; withdraw their facts.
        if !dropped.is_empty() {
            self.directory.remove_edges(key, &dropped).await;
        }
        true
    }

    /// The syncset to piggyback on the next message to `neighbor`.
    /// Only the COVERED method runs the victim synchronization channel.
    pub async fn outbound_syncset_for(&self, neighbor: EdgeIdx) -> Option<VictimSyncset> {
        if self.policy != CachePolicy::Covered || neighbor == self.edge_idx {
            return None;
        }
        let records = self
            .tracker
            .read()
            .await
            .local_records(self.victims_per_syncset);
        let mut monitors = self.monitors.lock().expect("monitor table poisoned");
        let monitor = monitors
            .entry(neighbor)
            .or_insert_with(|| VictimsyncMonitor::new(self.victim_cache_capacity));
        Some(monitor.next_outbound(records))
    }

    /// Pre-compress the next syncset for every known neighbor, off the
    /// hot path. Called after the local victim set changed.
    pub async fn pregenerate_syncsets(&self) {
        if self.policy != CachePolicy::Covered {
            return;
        }
        let records = self
            .tracker
            .read()
            .await
            .local_records(self.victims_per_syncset);
        let mut monitors = self.monitors.lock().expect("monitor table poisoned");
        for monitor in monitors.values_mut() {
            monitor.pregenerate(records.clone());
        }
    }

    /// Ingest the piggybacked victim syncset from a received envelope.
    pub async fn ingest_envelope(&self, env: &Envelope) {
        if let Some(syncset) = env.message.victim_syncset() {
            self.ingest_syncset(env.header.src_idx, syncset.clone()).await;
        }
    }

    pub async fn ingest_syncset(&self, from: EdgeIdx, syncset: VictimSyncset) {
        let states = {
            let mut monitors = self.monitors.lock().expect("monitor table poisoned");
            let monitor = monitors
                .entry(from)
                .or_insert_with(|| VictimsyncMonitor::new(self.victim_cache_capacity));
            monitor.on_receive(syncset)
        };
        if let Some(current) = states.last() {
            self.tracker
                .write()
                .await
                .install_neighbor(from, current.records());
        }
    }
}
