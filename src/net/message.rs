//! Wire messages with a shared common header.
//!
//! Every message crossing the simulated network is an `Envelope`: the
//! common header (sequence number, source node, source address, bandwidth
//! counter, flags) plus one typed payload. Envelopes are postcard-encoded
//! so the bandwidth counters reflect real serialized sizes.

use crate::directory::DirectoryInfo;
use crate::types::{EdgeIdx, Hitflag, Key, SeqNum, VTime, Value};
use crate::victim::VictimSyncset;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// The sender's current virtual time, piggybacked on BestGuess traffic so
/// the beacon can compare LRU-tail coldness across edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestGuessSyncinfo {
    pub vtime: VTime,
}

/// The placement edge chosen by the beacon for an uncached object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestGuessPlaceinfo {
    pub placement_edge_idx: EdgeIdx,
}

/// Benchmark control plane verbs. The evaluator itself is out of scope;
/// the cluster uses `FinishRun` to stop edges cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlOp {
    Initialize,
    StartRun,
    FinishRun,
    FinishWarmup,
    UpdateRules,
    DumpSnapshot,
}

/// Common header carried by every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgHeader {
    /// Request sequence number; responses echo the request's.
    pub seqnum: SeqNum,
    /// Source node index (edge index, or the cloud/control sentinels).
    pub src_idx: u32,
    /// Source network address (simulated).
    pub src_addr: SocketAddr,
    /// Serialized payload bytes, for bandwidth accounting at the receiver.
    pub bandwidth_bytes: u64,
    /// Background traffic (placement, victim sync) vs foreground.
    pub background: bool,
    /// Skip the propagation latency model for this hop.
    pub skip_propagation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub header: MsgHeader,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // Data plane: client <-> edge.
    LocalGetReq { key: Key },
    LocalGetRsp { key: Key, value: Value, hitflag: Hitflag },
    LocalPutReq { key: Key, value: Value },
    LocalPutRsp { key: Key },
    LocalDelReq { key: Key },
    LocalDelRsp { key: Key },

    // Data plane: edge <-> cloud.
    GlobalGetReq { key: Key },
    GlobalGetRsp { key: Key, value: Value },
    GlobalPutReq { key: Key, value: Value },
    GlobalPutRsp { key: Key },
    GlobalDelReq { key: Key },
    GlobalDelRsp { key: Key },

    // Data plane: edge <-> edge.
    RedirectedGetReq {
        key: Key,
    },
    RedirectedGetRsp {
        key: Key,
        value: Option<Value>,
        hitflag: Hitflag,
        victim_syncset: Option<VictimSyncset>,
    },

    // Directory control: edge <-> beacon.
    DirectoryLookupReq {
        key: Key,
        syncinfo: Option<BestGuessSyncinfo>,
    },
    DirectoryLookupRsp {
        is_being_written: bool,
        valid_exists: bool,
        dirinfo: Option<DirectoryInfo>,
        victim_syncset: Option<VictimSyncset>,
    },
    DirectoryUpdateReq {
        key: Key,
        edge_idx: EdgeIdx,
        is_admit: bool,
        syncinfo: Option<BestGuessSyncinfo>,
    },
    DirectoryUpdateRsp {
        is_being_written: bool,
        victim_syncset: Option<VictimSyncset>,
    },

    // MSI-style write guard: edge <-> beacon.
    AcquireWritelockReq {
        key: Key,
        syncinfo: Option<BestGuessSyncinfo>,
    },
    AcquireWritelockRsp {
        granted: bool,
    },
    FinishBlockReq {
        key: Key,
        /// Edge whose copy caught up with the write and should be
        /// revalidated (the writer itself, when it kept a copy).
        revalidate_edge: Option<EdgeIdx>,
    },
    FinishBlockRsp,

    // BestGuess placement: edge <-> beacon <-> edge.
    BgplaceDirectoryUpdateReq {
        key: Key,
        edge_idx: EdgeIdx,
        syncinfo: Option<BestGuessSyncinfo>,
    },
    BgplaceDirectoryUpdateRsp {
        preserved: bool,
    },
    PlacementTriggerReq {
        key: Key,
        syncinfo: BestGuessSyncinfo,
    },
    PlacementTriggerRsp {
        placeinfo: BestGuessPlaceinfo,
    },
    PlacementNotifyReq {
        key: Key,
        value: Value,
        is_valid: bool,
        victim_syncset: Option<VictimSyncset>,
    },
    PlacementNotifyRsp,

    // Invalidation fan-out: beacon <-> edge.
    InvalidationReq { key: Key },
    InvalidationRsp { key: Key },

    // Benchmark control plane.
    ControlReq { op: ControlOp },
    ControlRsp { op: ControlOp },
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::LocalGetReq { .. } => "localget",
            Message::LocalGetRsp { .. } => "localget.rsp",
            Message::LocalPutReq { .. } => "localput",
            Message::LocalPutRsp { .. } => "localput.rsp",
            Message::LocalDelReq { .. } => "localdel",
            Message::LocalDelRsp { .. } => "localdel.rsp",
            Message::GlobalGetReq { .. } => "globalget",
            Message::GlobalGetRsp { .. } => "globalget.rsp",
            Message::GlobalPutReq { .. } => "globalput",
            Message::GlobalPutRsp { .. } => "globalput.rsp",
            Message::GlobalDelReq { .. } => "globaldel",
            Message::GlobalDelRsp { .. } => "globaldel.rsp",
            Message::RedirectedGetReq { .. } => "redirectedget",
            Message::RedirectedGetRsp { .. } => "redirectedget.rsp",
            Message::DirectoryLookupReq { .. } => "dirlookup",
            Message::DirectoryLookupRsp { .. } => "dirlookup.rsp",
            Message::DirectoryUpdateReq { .. } => "dirupdate",
            Message::DirectoryUpdateRsp { .. } => "dirupdate.rsp",
            Message::AcquireWritelockReq { .. } => "acquirewritelock",
            Message::AcquireWritelockRsp { .. } => "acquirewritelock.rsp",
            Message::FinishBlockReq { .. } => "finishblock",
            Message::FinishBlockRsp => "finishblock.rsp",
            Message::BgplaceDirectoryUpdateReq { .. } => "bgplacedirupdate",
            Message::BgplaceDirectoryUpdateRsp { .. } => "bgplacedirupdate.rsp",
            Message::PlacementTriggerReq { .. } => "placementtrigger",
            Message::PlacementTriggerRsp { .. } => "placementtrigger.rsp",
            Message::PlacementNotifyReq { .. } => "placementnotify",
            Message::PlacementNotifyRsp => "placementnotify.rsp",
            Message::InvalidationReq { .. } => "invalidation",
            Message::InvalidationRsp { .. } => "invalidation.rsp",
            Message::ControlReq { .. } => "control",
            Message::ControlRsp { .. } => "control.rsp",
        }
    }

    /// Responses are routed to the pending-request table instead of a
    /// processor queue.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Message::LocalGetRsp { .. }
                | Message::LocalPutRsp { .. }
                | Message::LocalDelRsp { .. }
                | Message::GlobalGetRsp { .. }
                | Message::GlobalPutRsp { .. }
                | Message::GlobalDelRsp { .. }
                | Message::RedirectedGetRsp { .. }
                | Message::DirectoryLookupRsp { .. }
                | Message::DirectoryUpdateRsp { .. }
                | Message::AcquireWritelockRsp { .. }
                | Message::FinishBlockRsp
                | Message::BgplaceDirectoryUpdateRsp { .. }
                | Message::PlacementTriggerRsp { .. }
                | Message::PlacementNotifyRsp
                | Message::InvalidationRsp { .. }
                | Message::ControlRsp { .. }
        )
    }

    /// The piggybacked victim syncset, if this message carries one.
    pub fn victim_syncset(&self) -> Option<&VictimSyncset> {
        match self {
            Message::RedirectedGetRsp { victim_syncset, .. }
            | Message::DirectoryLookupRsp { victim_syncset, .. }
            | Message::DirectoryUpdateRsp { victim_syncset, .. }
            | Message::PlacementNotifyReq { victim_syncset, .. } => victim_syncset.as_ref(),
            _ => None,
        }
    }

    /// The piggybacked BestGuess syncinfo, if this message carries one.
    pub fn syncinfo(&self) -> Option<BestGuessSyncinfo> {
        match self {
            Message::DirectoryLookupReq { syncinfo, .. }
            | Message::DirectoryUpdateReq { syncinfo, .. }
            | Message::AcquireWritelockReq { syncinfo, .. }
            | Message::BgplaceDirectoryUpdateReq { syncinfo, .. } => *syncinfo,
            Message::PlacementTriggerReq { syncinfo, .. } => Some(*syncinfo),
            _ => None,
        }
    }
}
