//! Placement processor: admits fetched values per the active method's
//! placement policy, trims to capacity, and keeps the victim nomination
//! current.

use super::wrapper::{EdgeCtx, QUEUE_POLL};
use crate::concurrency::{PopOutcome, WorkReceiver};
use crate::directory::DirinfoSet;
use crate::net::{Envelope, Message};
use crate::types::{Key, SeqNum, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// One unit of placement work.
pub enum PlacementItem {
    /// A value fetched by the foreground path, to be placed per policy.
    AdmitLocal { key: Key, value: Value },
    /// A placement notification from a peer: admit here, then ack.
    Notify {
        src: u32,
        seqnum: SeqNum,
        key: Key,
        value: Value,
        is_valid: bool,
    },
}

impl PlacementItem {
    pub fn from_notify(env: &Envelope) -> Self {
        match &env.message {
            Message::PlacementNotifyReq {
                key,
                value,
                is_valid,
                ..
            } => PlacementItem::Notify {
                src: env.header.src_idx,
                seqnum: env.header.seqnum,
                key: key.clone(),
                value: value.clone(),
                is_valid: *is_valid,
            },
            other => unreachable!("not a placement notification: {}", other.command()),
        }
    }
}

pub async fn run(ctx: Arc<EdgeCtx>, mut rx: WorkReceiver<PlacementItem>) {
    loop {
        match rx.pop(QUEUE_POLL).await {
            PopOutcome::Item(item) => handle(&ctx, item).await,
            PopOutcome::Timeout => {
                if !ctx.is_running() {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    debug!(edge = ctx.idx, "placement processor stopped");
}

async fn handle(ctx: &Arc<EdgeCtx>, item: PlacementItem) {
    match item {
        PlacementItem::AdmitLocal { key, value } => {
            let _guard = ctx.serial_lock.write(&key).await;
            ctx.manager.place(ctx, &key, value).await;
            refresh_victim_nomination(ctx).await;
        }
        PlacementItem::Notify {
            src,
            seqnum,
            key,
            value,
            is_valid,
        } => {
            {
                let _guard = ctx.serial_lock.write(&key).await;
                if admit_or_update(ctx, &key, value, is_valid).await {
                    ctx.coop
                        .update_beacon(&key, ctx.idx, true, ctx.bg_syncinfo().await)
                        .await;
                    trim_to_capacity(ctx).await;
                } else {
                    warn!(edge = ctx.idx, key = %key, "placement notification not admitted");
                }
                refresh_victim_nomination(ctx).await;
            }
            // Ack only after admission and the capacity trim completed.
            ctx.link
                .respond(src, seqnum, Message::PlacementNotifyRsp, true)
                .await;
        }
    }
}

/// Install a value: in-place update when a (possibly invalid) copy exists,
/// fresh admission otherwise. Returns whether the object is cached after.
pub(crate) async fn admit_or_update(ctx: &Arc<EdgeCtx>, key: &Key, value: Value, valid: bool) -> bool {
    let mut cache = ctx.cache.lock().await;
    if cache.is_cached(key) {
        cache.update(key, value, valid)
    } else {
        cache.admit(key, value, valid)
    }
}

/// Evict until the edge's capacity envelope (cache bytes plus beacon-owned
/// directory bytes) holds, withdrawing each victim's directory fact.
pub(crate) async fn trim_to_capacity(ctx: &Arc<EdgeCtx>) {
    loop {
        let (used, victim, fine_grained) = {
            let cache = ctx.cache.lock().await;
            (
                cache.size_bytes() + ctx.directory.size_bytes(),
                cache.victim_key(),
                cache.has_fine_grained_management(),
            )
        };
        if used <= ctx.cfg.capacity_bytes {
            break;
        }

        if fine_grained {
            let Some(victim) = victim else {
                break;
            };
            let evicted = ctx.cache.lock().await.evict(&victim).is_some();
            if evicted {
                ctx.stats.record_eviction();
                ctx.coop.update_beacon(&victim, ctx.idx, false, None).await;
            } else {
                break;
            }
        } else {
            let required = used - ctx.cfg.capacity_bytes;
            let victims = ctx.cache.lock().await.evict_bulk(required);
            if victims.is_empty() {
                break;
            }
            for (victim, _) in victims {
                ctx.stats.record_eviction();
                ctx.coop.update_beacon(&victim, ctx.idx, false, None).await;
            }
        }
    }
}

/// Keep the victim tracker's local nomination in step with the cache's
/// current eviction candidate.
pub(crate) async fn refresh_victim_nomination(ctx: &Arc<EdgeCtx>) {
    let victim = ctx.cache.lock().await.victim_key();
    let beacon = victim.as_ref().map(|key| ctx.coop.beacon_of(key));
    let changed;
    {
        let mut tracker = ctx.coop.tracker().write().await;
        let nominated: Vec<Key> = tracker
            .local_records(usize::MAX)
            .into_iter()
            .map(|r| r.key)
            .collect();
        let already_nominated = nominated.iter().any(|key| Some(key) == victim.as_ref());
        changed = !already_nominated || nominated.len() > 1;
        for key in nominated {
            if Some(&key) != victim.as_ref() {
                tracker.remove_local_victim(&key);
            }
        }
        if let (Some(key), Some(beacon)) = (victim, beacon)
            && !already_nominated
        {
            let dirinfos = DirinfoSet::complete([crate::directory::DirectoryInfo::new(ctx.idx)]);
            tracker.add_local_victim(key, beacon, dirinfos);
        }
    }
    if changed {
        ctx.coop.pregenerate_syncsets().await;
    }
}
