//! The cache manager: per-method placement policy invoked after a value
//! arrives from cloud or neighbor.

use super::beacon;
use super::placement::{admit_or_update, trim_to_capacity};
use super::weight::WeightTuner;
use super::wrapper::EdgeCtx;
use crate::config::{CachePolicy, Config};
use crate::types::{Key, Value};
use std::sync::Arc;
use tracing::debug;

/// An object is only worth placing if the placement gain is positive.
pub const MIN_ADMISSION_BENEFIT: f64 = 0.0;

pub enum CacheManager {
    /// Independent admission: always admit locally, then trim.
    Basic,
    /// Approximate global LRU via victim-vtime comparison at the beacon.
    BestGuess,
    /// Local/cooperative reward trade-off with tuned weights.
    Covered { tuner: WeightTuner },
}

impl CacheManager {
    pub fn for_policy(policy: CachePolicy, cfg: &Config) -> Self {
        match policy {
            CachePolicy::BestGuess => CacheManager::BestGuess,
            CachePolicy::Covered => CacheManager::Covered {
                tuner: WeightTuner::new(
                    cfg.edgecnt,
                    cfg.propagation.client_edge_us,
                    cfg.propagation.cross_edge_us,
                    cfg.propagation.edge_cloud_us,
                ),
            },
            _ => CacheManager::Basic,
        }
    }

    /// Feed observed round-trip latencies into the weight tuner.
    pub fn observe_latency(
        &self,
        ctx: &Arc<EdgeCtx>,
        cross_edge_us: Option<u64>,
        edge_cloud_us: Option<u64>,
    ) {
        if let CacheManager::Covered { tuner } = self {
            let client_edge_us = ctx.cfg.propagation.client_edge_us;
            tuner.tune(
                (client_edge_us > 0).then_some(client_edge_us),
                cross_edge_us,
                edge_cloud_us,
            );
        }
    }

    /// Place a freshly fetched value. Caller holds the key's exclusive
    /// serializability lock.
    pub async fn place(&self, ctx: &Arc<EdgeCtx>, key: &Key, value: Value) {
        match self {
            CacheManager::Basic => place_basic(ctx, key, value).await,
            CacheManager::BestGuess => place_bestguess(ctx, key, value).await,
            CacheManager::Covered { tuner } => place_covered(ctx, tuner, key, value).await,
        }
    }
}

/// Always admit locally; a copy announced while a writer is in flight
/// starts invalid.
async fn place_basic(ctx: &Arc<EdgeCtx>, key: &Key, value: Value) {
    let Some(is_being_written) = ctx.coop.update_beacon(key, ctx.idx, true, None).await else {
        return;
    };
    admit_or_update(ctx, key, value, !is_being_written).await;
    trim_to_capacity(ctx).await;
}

/// Reserve the directory slot, ask the beacon for the globally coldest
/// edge, and forward the value there.
async fn place_bestguess(ctx: &Arc<EdgeCtx>, key: &Key, value: Value) {
    if ctx.cache.lock().await.is_cached(key) {
        return; // already placed here concurrently
    }
    let syncinfo = ctx.bg_syncinfo().await;
    let Some(preserved) = ctx
        .coop
        .preserve_directory_if_global_uncached(key, syncinfo)
        .await
    else {
        return;
    };
    if !preserved {
        // Some edge already caches (or claimed) the key; nothing to place.
        return;
    }

    let our_vtime = syncinfo.map(|s| s.vtime).unwrap_or(0);
    let target = if ctx.coop.is_beacon(key) {
        beacon::choose_bestguess_placement(ctx, ctx.idx, our_vtime).await
    } else {
        let syncinfo = syncinfo.unwrap_or(crate::net::BestGuessSyncinfo { vtime: our_vtime });
        let Some(env) = ctx
            .link
            .request(
                ctx.coop.beacon_of(key),
                crate::net::Message::PlacementTriggerReq {
                    key: key.clone(),
                    syncinfo,
                },
                false,
            )
            .await
        else {
            return;
        };
        match env.message {
            crate::net::Message::PlacementTriggerRsp { placeinfo } => {
                placeinfo.placement_edge_idx
            }
            other => unreachable!("unexpected response to placementtrigger: {}", other.command()),
        }
    };

    debug!(edge = ctx.idx, key = %key, target, "bestguess placement");
    if target == ctx.idx {
        admit_or_update(ctx, key, value, true).await;
        ctx.coop
            .update_beacon(key, ctx.idx, true, ctx.bg_syncinfo().await)
            .await;
        trim_to_capacity(ctx).await;
    } else {
        beacon::notify_placement(ctx.clone(), target, key.clone(), value);
    }
}

/// Reward-based placement: admit where the gain (admission benefit minus
/// eviction cost) is largest and positive, else try a neighbor whose
/// eviction candidates are covered elsewhere, else drop the value.
async fn place_covered(ctx: &Arc<EdgeCtx>, tuner: &WeightTuner, key: &Key, value: Value) {
    let weights = tuner.weights();
    let (benefit, already_cached) = {
        let cache = ctx.cache.lock().await;
        let (local_pop, coop_pop) = cache.popularity(key);
        let (victim_local, victim_coop) = cache.victim_popularity();
        let admission_benefit =
            weights.local_hit_weight * local_pop + weights.cooperative_hit_weight * coop_pop;
        let eviction_cost = weights.local_hit_weight * victim_local
            + weights.cooperative_hit_weight * victim_coop;
        (admission_benefit - eviction_cost, cache.is_cached(key))
    };

    if already_cached || benefit > MIN_ADMISSION_BENEFIT {
        let Some(is_being_written) = ctx.coop.update_beacon(key, ctx.idx, true, None).await else {
            return;
        };
        admit_or_update(ctx, key, value, !is_being_written).await;
        trim_to_capacity(ctx).await;
        return;
    }

    // Not worth keeping here. A neighbor whose eviction candidates have
    // copies elsewhere can absorb the object at low cost.
    let cooperative_target = {
        let tracker = ctx.coop.tracker().read().await;
        tracker
            .covered_victim_counts()
            .into_iter()
            .filter(|&(edge, covered)| edge != ctx.idx && covered > 0)
            .max_by_key(|&(edge, covered)| (covered, std::cmp::Reverse(edge)))
            .map(|(edge, _)| edge)
    };
    match cooperative_target {
        Some(target) => {
            debug!(edge = ctx.idx, key = %key, target, "covered cooperative placement");
            beacon::notify_placement(ctx.clone(), target, key.clone(), value);
        }
        None => {
            debug!(edge = ctx.idx, key = %key, "placement gain non-positive, not admitted");
        }
    }
}
