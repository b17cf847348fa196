//! Beacon server: authoritative directory owner for the keys whose
//! consistent hash maps to this edge.

use super::wrapper::{EdgeCtx, QUEUE_POLL};
use crate::concurrency::{PopOutcome, WorkReceiver};
use crate::net::{BestGuessPlaceinfo, Envelope, Message};
use crate::types::{EdgeIdx, Key, VTime};
use std::sync::Arc;
use tracing::debug;

pub async fn run(ctx: Arc<EdgeCtx>, mut rx: WorkReceiver<Envelope>) {
    loop {
        match rx.pop(QUEUE_POLL).await {
            PopOutcome::Item(env) => handle(&ctx, env).await,
            PopOutcome::Timeout => {
                if !ctx.is_running() {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    debug!(edge = ctx.idx, "beacon server stopped");
}

/// Record the sender's piggybacked victim vtime, if any.
async fn note_syncinfo(ctx: &Arc<EdgeCtx>, env: &Envelope) {
    if let Some(syncinfo) = env.message.syncinfo() {
        ctx.cache
            .lock()
            .await
            .note_peer_victim_vtime(env.header.src_idx, syncinfo.vtime);
    }
}

async fn handle(ctx: &Arc<EdgeCtx>, env: Envelope) {
    note_syncinfo(ctx, &env).await;
    let src = env.header.src_idx;
    let seqnum = env.header.seqnum;

    match env.message {
        Message::DirectoryLookupReq { key, .. } => {
            let outcome = ctx.directory.lookup(&key).await;
            let victim_syncset = ctx.coop.outbound_syncset_for(src).await;
            ctx.link
                .respond(
                    src,
                    seqnum,
                    Message::DirectoryLookupRsp {
                        is_being_written: outcome.is_being_written,
                        valid_exists: outcome.valid_exists,
                        dirinfo: outcome.dirinfo,
                        victim_syncset,
                    },
                    false,
                )
                .await;
        }

        Message::DirectoryUpdateReq {
            key,
            edge_idx,
            is_admit,
            ..
        } => {
            let is_being_written = ctx.directory.update(&key, edge_idx, is_admit).await;
            let victim_syncset = ctx.coop.outbound_syncset_for(src).await;
            ctx.link
                .respond(
                    src,
                    seqnum,
                    Message::DirectoryUpdateRsp {
                        is_being_written,
                        victim_syncset,
                    },
                    false,
                )
                .await;
        }

        Message::AcquireWritelockReq { key, .. } => {
            // The grant can wait on a concurrent writer; run it aside so
            // the beacon keeps serving (the current holder's FinishBlock
            // must get through). A retransmitted acquire joins the grant
            // cycle already in flight, whose response carries the same
            // sequence number.
            if !ctx.writelocks.begin_grant(&key, src) {
                return;
            }
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let granted = ctx.coop.prepare_write_at_beacon(&key, src).await;
                ctx.writelocks.end_grant(&key, src);
                ctx.link
                    .respond(src, seqnum, Message::AcquireWritelockRsp { granted }, false)
                    .await;
            });
        }

        Message::FinishBlockReq {
            key,
            revalidate_edge,
        } => {
            if let Some(edge) = revalidate_edge {
                ctx.directory.revalidate(&key, edge).await;
            }
            ctx.writelocks.release(&key);
            ctx.link
                .respond(src, seqnum, Message::FinishBlockRsp, false)
                .await;
        }

        Message::BgplaceDirectoryUpdateReq { key, edge_idx, .. } => {
            let preserved = ctx.directory.preserve_if_unmapped(&key, edge_idx).await;
            ctx.link
                .respond(
                    src,
                    seqnum,
                    Message::BgplaceDirectoryUpdateRsp { preserved },
                    false,
                )
                .await;
        }

        Message::PlacementTriggerReq { key, syncinfo } => {
            let target = choose_bestguess_placement(ctx, src, syncinfo.vtime).await;
            if target != src {
                ctx.directory.move_reservation(&key, src, target).await;
            }
            ctx.link
                .respond(
                    src,
                    seqnum,
                    Message::PlacementTriggerRsp {
                        placeinfo: BestGuessPlaceinfo {
                            placement_edge_idx: target,
                        },
                    },
                    false,
                )
                .await;
        }

        other => unreachable!("unexpected message at beacon: {}", other.command()),
    }
}

/// Pick the placement edge for an uncached object: among the requester,
/// this beacon, and every neighbor with a known victim vtime, the edge
/// whose LRU tail is globally coldest (smallest victim vtime) wins.
pub async fn choose_bestguess_placement(
    ctx: &Arc<EdgeCtx>,
    requester: EdgeIdx,
    requester_vtime: VTime,
) -> EdgeIdx {
    let cache = ctx.cache.lock().await;
    let mut candidates: Vec<(EdgeIdx, VTime)> = cache.peer_victim_vtimes();
    candidates.push((ctx.idx, cache.victim_vtime().unwrap_or(0)));
    drop(cache);
    candidates.retain(|(edge, _)| *edge != requester);
    candidates.push((requester, requester_vtime));

    candidates
        .into_iter()
        .min_by_key(|&(edge, vtime)| (vtime, edge))
        .map(|(edge, _)| edge)
        .expect("candidate set is never empty")
}

/// Forward an uncached value to its chosen placement edge and await the
/// target's admission ack aside, so the caller's placement processor
/// keeps draining (two edges notifying each other must not interlock).
pub fn notify_placement(ctx: Arc<EdgeCtx>, target: EdgeIdx, key: Key, value: crate::types::Value) {
    tokio::spawn(async move {
        let victim_syncset = ctx.coop.outbound_syncset_for(target).await;
        ctx.link
            .request(
                target,
                Message::PlacementNotifyReq {
                    key,
                    value,
                    is_valid: true,
                    victim_syncset,
                },
                true,
            )
            .await;
    });
}
