//! The edge composition root: owns the cache, directory, cooperation
//! wrapper, processors, and the beacon server, and wires them to the
//! simulated network.

use super::beacon;
use super::cache_server;
use super::cooperation::CooperationWrapper;
use super::invalidation;
use super::manager::CacheManager;
use super::placement::{self, PlacementItem};
use super::redirection;
use crate::cache::CacheWrapper;
use crate::concurrency::{PerKeyRwLock, QueueError, WorkSender, work_queue};
use crate::config::{CachePolicy, Config};
use crate::directory::{DirectoryTable, WritelockTable};
use crate::net::{
    BestGuessSyncinfo, ControlOp, Envelope, Message, NodeLink, Propagation, Router,
};
use crate::net::transport::PendingTable;
use crate::stats::EdgeStats;
use crate::types::EdgeIdx;
use crate::victim::VictimTracker;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long a processor waits on its queue before re-checking the running
/// flag.
pub(crate) const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Shared state of one edge node, handed to every processor task.
pub struct EdgeCtx {
    pub idx: EdgeIdx,
    pub cfg: Arc<Config>,
    pub policy: CachePolicy,
    pub cache: Mutex<CacheWrapper>,
    pub serial_lock: PerKeyRwLock,
    pub directory: Arc<DirectoryTable>,
    pub writelocks: Arc<WritelockTable>,
    pub link: NodeLink,
    pub coop: CooperationWrapper,
    pub manager: CacheManager,
    pub stats: Arc<EdgeStats>,
    pub running: Arc<AtomicBool>,
    pub placement_tx: WorkSender<PlacementItem>,
}

impl EdgeCtx {
    /// The BestGuess vtime piggyback for outbound beacon traffic: this
    /// edge's victim vtime (0 when the cache is empty, i.e. maximally
    /// cold).
    pub async fn bg_syncinfo(&self) -> Option<BestGuessSyncinfo> {
        if self.policy != CachePolicy::BestGuess {
            return None;
        }
        let cache = self.cache.lock().await;
        Some(BestGuessSyncinfo {
            vtime: cache.victim_vtime().unwrap_or(0),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// One running edge node.
pub struct EdgeWrapper {
    ctx: Arc<EdgeCtx>,
    handles: Vec<JoinHandle<()>>,
}

impl EdgeWrapper {
    /// Build and start an edge: registers its inbox on the router and
    /// spawns the dispatcher plus all processor tasks.
    pub fn spawn(cfg: Arc<Config>, idx: EdgeIdx, router: Router, propagation: Arc<Propagation>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let pending = PendingTable::default();
        let inbox = router.register(idx, cfg.queue_depth);
        let link = NodeLink::new(
            idx,
            router,
            pending.clone(),
            running.clone(),
            cfg.request_timeout,
            propagation,
        );

        let writelocks = Arc::new(WritelockTable::new());
        let directory = Arc::new(DirectoryTable::new(cfg.lock_shards, writelocks.clone()));
        let tracker = Arc::new(tokio::sync::RwLock::new(VictimTracker::new()));
        let coop = CooperationWrapper::new(
            idx,
            cfg.edgecnt,
            cfg.cache_policy,
            link.clone(),
            directory.clone(),
            writelocks.clone(),
            tracker,
            cfg.victims_per_syncset,
            cfg.victim_cache_capacity,
            running.clone(),
        );

        let (placement_tx, placement_rx) = work_queue(cfg.queue_depth);
        let (foreground_tx, foreground_rx) = work_queue(cfg.queue_depth);
        let (redirection_tx, redirection_rx) = work_queue(cfg.queue_depth);
        let (invalidation_tx, invalidation_rx) = work_queue(cfg.queue_depth);
        let (beacon_tx, beacon_rx) = work_queue(cfg.queue_depth);

        let ctx = Arc::new(EdgeCtx {
            idx,
            policy: cfg.cache_policy,
            cache: Mutex::new(CacheWrapper::new(cfg.cache_policy, cfg.capacity_bytes)),
            serial_lock: PerKeyRwLock::new(cfg.lock_shards),
            directory,
            writelocks,
            link,
            coop,
            manager: CacheManager::for_policy(cfg.cache_policy, &cfg),
            stats: Arc::new(EdgeStats::new()),
            running: running.clone(),
            placement_tx,
            cfg,
        });

        info!(edge = idx, policy = %ctx.policy, "edge node starting");

        let handles = vec![
            tokio::spawn(dispatch_loop(
                ctx.clone(),
                inbox,
                pending,
                foreground_tx,
                redirection_tx,
                invalidation_tx,
                beacon_tx,
            )),
            tokio::spawn(cache_server::run(ctx.clone(), foreground_rx)),
            tokio::spawn(redirection::run(ctx.clone(), redirection_rx)),
            tokio::spawn(invalidation::run(ctx.clone(), invalidation_rx)),
            tokio::spawn(placement::run(ctx.clone(), placement_rx)),
            tokio::spawn(beacon::run(ctx.clone(), beacon_rx)),
        ];

        Self { ctx, handles }
    }

    pub fn ctx(&self) -> &Arc<EdgeCtx> {
        &self.ctx
    }

    pub fn idx(&self) -> EdgeIdx {
        self.ctx.idx
    }

    pub fn stats(&self) -> Arc<EdgeStats> {
        self.ctx.stats.clone()
    }

    /// Stop the node: clears the running flag and aborts the processor
    /// tasks once their current poll cycle ends.
    pub async fn shutdown(&mut self) {
        self.ctx.running.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!(edge = self.ctx.idx, "edge node stopped");
    }
}

/// Inbox dispatcher: decodes envelopes, routes responses to the pending
/// table and requests to the right processor queue.
async fn dispatch_loop(
    ctx: Arc<EdgeCtx>,
    mut inbox: tokio::sync::mpsc::Receiver<Vec<u8>>,
    pending: PendingTable,
    foreground_tx: WorkSender<Envelope>,
    redirection_tx: WorkSender<Envelope>,
    invalidation_tx: WorkSender<Envelope>,
    beacon_tx: WorkSender<Envelope>,
) {
    loop {
        let bytes = match tokio::time::timeout(QUEUE_POLL, inbox.recv()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(_) => {
                if !ctx.is_running() {
                    break;
                }
                continue;
            }
        };
        let env: Envelope =
            postcard::from_bytes(&bytes).expect("malformed envelope on an edge inbox");
        ctx.stats.record_bandwidth(env.header.bandwidth_bytes);

        if env.message.is_response() {
            pending.complete(env);
            continue;
        }

        match route_of(&env.message) {
            Route::Foreground => {
                // Foreground path: a full queue back-pressures the sender.
                if foreground_tx.push(env).await.is_err() {
                    break;
                }
            }
            Route::Redirection => {
                if redirection_tx.push(env).await.is_err() {
                    break;
                }
            }
            Route::Invalidation => {
                if invalidation_tx.push(env).await.is_err() {
                    break;
                }
            }
            Route::Placement => {
                // Background placement: overflow means lost data.
                match ctx.placement_tx.try_push(PlacementItem::from_notify(&env)) {
                    Ok(()) => {}
                    Err(QueueError::Overflow) => {
                        panic!("placement ring overflow at edge {}", ctx.idx)
                    }
                    Err(QueueError::Closed) => break,
                }
            }
            Route::Beacon => {
                if beacon_tx.push(env).await.is_err() {
                    break;
                }
            }
            Route::Control(op) => handle_control(&ctx, &env, op).await,
        }
    }
    debug!(edge = ctx.idx, "dispatcher stopped");
}

enum Route {
    Foreground,
    Redirection,
    Invalidation,
    Placement,
    Beacon,
    Control(ControlOp),
}

fn route_of(message: &Message) -> Route {
    match message {
        Message::LocalGetReq { .. } | Message::LocalPutReq { .. } | Message::LocalDelReq { .. } => {
            Route::Foreground
        }
        Message::RedirectedGetReq { .. } => Route::Redirection,
        Message::InvalidationReq { .. } => Route::Invalidation,
        Message::PlacementNotifyReq { .. } => Route::Placement,
        Message::DirectoryLookupReq { .. }
        | Message::DirectoryUpdateReq { .. }
        | Message::AcquireWritelockReq { .. }
        | Message::FinishBlockReq { .. }
        | Message::BgplaceDirectoryUpdateReq { .. }
        | Message::PlacementTriggerReq { .. } => Route::Beacon,
        Message::ControlReq { op } => Route::Control(*op),
        other => unreachable!("unexpected request at edge: {}", other.command()),
    }
}

async fn handle_control(ctx: &Arc<EdgeCtx>, env: &Envelope, op: ControlOp) {
    if op == ControlOp::FinishRun {
        info!(edge = ctx.idx, "finishrun received");
        ctx.running.store(false, Ordering::Release);
    }
    ctx.link
        .respond(
            env.header.src_idx,
            env.header.seqnum,
            Message::ControlRsp { op },
            false,
        )
        .await;
}
