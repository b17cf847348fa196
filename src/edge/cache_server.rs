//! The foreground request engine: client get/put/del at the closest edge.

use super::placement::PlacementItem;
use super::wrapper::{EdgeCtx, QUEUE_POLL};
use crate::cache::LocalGet;
use crate::concurrency::{PopOutcome, WorkReceiver};
use crate::net::{CLOUD_IDX, Envelope, Message};
use crate::types::{Hitflag, Key, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Drain the foreground queue. Each request runs as its own task so a
/// write stalled on the beacon's write lock never blocks unrelated keys.
pub async fn run(ctx: Arc<EdgeCtx>, mut rx: WorkReceiver<Envelope>) {
    let mut inflight = JoinSet::new();
    loop {
        match rx.pop(QUEUE_POLL).await {
            PopOutcome::Item(env) => {
                let ctx = ctx.clone();
                inflight.spawn(async move { handle(ctx, env).await });
                // Reap finished requests without blocking.
                while inflight.try_join_next().is_some() {}
            }
            PopOutcome::Timeout => {
                if !ctx.is_running() {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    inflight.abort_all();
    debug!(edge = ctx.idx, "cache server stopped");
}

async fn handle(ctx: Arc<EdgeCtx>, env: Envelope) {
    let src = env.header.src_idx;
    let seqnum = env.header.seqnum;
    match env.message {
        Message::LocalGetReq { key } => handle_get(&ctx, src, seqnum, key).await,
        Message::LocalPutReq { key, value } => {
            handle_write(&ctx, src, seqnum, key, Some(value)).await
        }
        Message::LocalDelReq { key } => handle_write(&ctx, src, seqnum, key, None).await,
        other => unreachable!("unexpected foreground message: {}", other.command()),
    }
}

async fn handle_get(ctx: &Arc<EdgeCtx>, src: u32, seqnum: u64, key: Key) {
    let _guard = ctx.serial_lock.read(&key).await;

    // 1. Local cache.
    {
        let mut cache = ctx.cache.lock().await;
        if let LocalGet::Hit(value) = cache.get(&key) {
            drop(cache);
            ctx.stats.record_local_hit();
            respond_get(ctx, src, seqnum, key, value, Hitflag::LocalHit).await;
            return;
        }
    }

    // 2. Directory lookup at the beacon.
    let syncinfo = ctx.bg_syncinfo().await;
    let Some(lookup) = ctx.coop.lookup_beacon(&key, syncinfo).await else {
        // Shutting down: unwind with a tombstone so the client still gets
        // an answer.
        respond_get(ctx, src, seqnum, key, Value::tombstone(), Hitflag::GlobalMiss).await;
        return;
    };

    let mut hitflag = Hitflag::GlobalMiss;
    let mut value: Option<Value> = None;
    let mut cross_edge_us: Option<u64> = None;
    let mut saw_invalid_copy = false;

    // 3. Redirected get at a caching neighbor, unless a writer is in
    //    progress (a stale read must never be served).
    if !lookup.is_being_written
        && let Some(info) = lookup.dirinfo
        && info.edge_idx() != ctx.idx
    {
        let started = Instant::now();
        if let Some(rsp) = ctx
            .link
            .request(
                info.edge_idx(),
                Message::RedirectedGetReq { key: key.clone() },
                false,
            )
            .await
        {
            cross_edge_us = Some(started.elapsed().as_micros() as u64);
            ctx.coop.ingest_envelope(&rsp).await;
            if let Message::RedirectedGetRsp {
                value: coop_value,
                hitflag: coop_flag,
                ..
            } = rsp.message
            {
                match coop_flag {
                    Hitflag::CooperativeHit => {
                        value = coop_value;
                        hitflag = Hitflag::CooperativeHit;
                    }
                    Hitflag::CooperativeInvalid => {
                        saw_invalid_copy = true;
                    }
                    _ => {
                        warn!(edge = ctx.idx, key = %key, "stale directory info, target missed");
                    }
                }
            }
        }
    }

    // 4. Cloud origin on a cooperative miss (or forced miss).
    let mut edge_cloud_us: Option<u64> = None;
    let value = match value {
        Some(v) => v,
        None => {
            let started = Instant::now();
            match ctx
                .link
                .request(CLOUD_IDX, Message::GlobalGetReq { key: key.clone() }, false)
                .await
            {
                Some(rsp) => {
                    edge_cloud_us = Some(started.elapsed().as_micros() as u64);
                    match rsp.message {
                        Message::GlobalGetRsp { value, .. } => value,
                        other => {
                            unreachable!("unexpected response to globalget: {}", other.command())
                        }
                    }
                }
                None => Value::tombstone(),
            }
        }
    };

    match hitflag {
        Hitflag::CooperativeHit => ctx.stats.record_cooperative_hit(),
        _ if saw_invalid_copy => ctx.stats.record_cooperative_invalid(),
        _ => ctx.stats.record_global_miss(),
    }
    ctx.manager.observe_latency(ctx, cross_edge_us, edge_cloud_us);

    respond_get(ctx, src, seqnum, key.clone(), value.clone(), hitflag).await;

    // 5. Async placement of the fetched value. Never while a writer is in
    //    flight, and tombstones are not cache material.
    if !lookup.is_being_written && !value.is_deleted() {
        enqueue_placement(ctx, key, value).await;
    }
}

async fn handle_write(ctx: &Arc<EdgeCtx>, src: u32, seqnum: u64, key: Key, value: Option<Value>) {
    let is_put = value.is_some();
    let _guard = ctx.serial_lock.write(&key).await;

    // 1. Transition the key to "being written" at the beacon; the grant
    //    arrives only after every cached copy has been invalidated.
    let syncinfo = ctx.bg_syncinfo().await;
    let granted = ctx.coop.acquire_writelock(&key, syncinfo).await;
    if granted != Some(true) {
        // Shutting down; acknowledge so the client can unwind.
        respond_write(ctx, src, seqnum, key, is_put).await;
        return;
    }

    // 2. Write through to the cloud.
    let cloud_msg = match &value {
        Some(v) => Message::GlobalPutReq {
            key: key.clone(),
            value: v.clone(),
        },
        None => Message::GlobalDelReq { key: key.clone() },
    };
    ctx.link.request(CLOUD_IDX, cloud_msg, false).await;

    // 3. Refresh or drop the local copy.
    let mut revalidate_edge = None;
    let mut dropped_local = false;
    let was_cached;
    let independent_admit;
    {
        let mut cache = ctx.cache.lock().await;
        was_cached = cache.is_cached(&key);
        independent_admit = cache.need_independent_admit(&key);
        if was_cached {
            match &value {
                Some(v) => {
                    if cache.update(&key, v.clone(), true) {
                        revalidate_edge = Some(ctx.idx);
                    } else {
                        dropped_local = true;
                    }
                }
                None => {
                    cache.evict(&key);
                    dropped_local = true;
                }
            }
        }
    }

    // 4. Release the write lock; the beacon revalidates the caught-up
    //    copy.
    ctx.coop.finish_block(&key, revalidate_edge).await;
    if dropped_local {
        ctx.coop.update_beacon(&key, ctx.idx, false, None).await;
    }

    if is_put {
        ctx.stats.record_put();
    } else {
        ctx.stats.record_del();
    }
    respond_write(ctx, src, seqnum, key.clone(), is_put).await;

    // 5. A put of an uncached object admits it locally for policies with
    //    independent admission (and lets COVERED run its reward check).
    if let Some(value) = value
        && !was_cached
        && (independent_admit || ctx.policy == crate::config::CachePolicy::Covered)
    {
        enqueue_placement(ctx, key, value).await;
    }
}

async fn respond_get(ctx: &Arc<EdgeCtx>, src: u32, seqnum: u64, key: Key, value: Value, hitflag: Hitflag) {
    ctx.link
        .respond(src, seqnum, Message::LocalGetRsp { key, value, hitflag }, false)
        .await;
}

async fn respond_write(ctx: &Arc<EdgeCtx>, src: u32, seqnum: u64, key: Key, is_put: bool) {
    let msg = if is_put {
        Message::LocalPutRsp { key }
    } else {
        Message::LocalDelRsp { key }
    };
    ctx.link.respond(src, seqnum, msg, false).await;
}

async fn enqueue_placement(ctx: &Arc<EdgeCtx>, key: Key, value: Value) {
    // Foreground-triggered admissions back-pressure rather than overflow.
    let _ = ctx
        .placement_tx
        .push(PlacementItem::AdmitLocal { key, value })
        .await;
}
