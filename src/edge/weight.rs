//! Latency-aware weight tuning for the COVERED placement policy.
//!
//! The local-hit weight w1 and cooperative-hit weight w2 are the latency
//! savings of the respective hit class over a global miss, derived from
//! exponentially weighted moving averages of the observed client-edge,
//! cross-edge, and edge-cloud propagation latencies.

use std::sync::Mutex;

/// EWMA smoothing factor for observed latencies.
const EWMA_ALPHA: f64 = 0.1;

/// Fallback latencies (microseconds) when the configuration models a
/// zero-latency network; keeps the weight ordering w1 > w2 >= 0 intact.
const FALLBACK_CLIENT_EDGE_US: f64 = 1_000.0;
const FALLBACK_CROSS_EDGE_US: f64 = 5_000.0;
const FALLBACK_EDGE_CLOUD_US: f64 = 20_000.0;

/// The current weight pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightInfo {
    pub local_hit_weight: f64,
    pub cooperative_hit_weight: f64,
}

#[derive(Debug)]
struct TunerState {
    ewma_client_edge_us: f64,
    ewma_cross_edge_us: f64,
    ewma_edge_cloud_us: f64,
    weights: WeightInfo,
}

/// Thread-safe weight manager, one per COVERED edge.
#[derive(Debug)]
pub struct WeightTuner {
    /// Probability that a key's beacon is a remote edge.
    remote_beacon_prob: f64,
    state: Mutex<TunerState>,
}

impl WeightTuner {
    pub fn new(
        edgecnt: u32,
        client_edge_us: u64,
        cross_edge_us: u64,
        edge_cloud_us: u64,
    ) -> Self {
        let pick = |configured: u64, fallback: f64| {
            if configured == 0 {
                fallback
            } else {
                configured as f64
            }
        };
        let remote_beacon_prob = 1.0 - 1.0 / edgecnt.max(1) as f64;
        let mut state = TunerState {
            ewma_client_edge_us: pick(client_edge_us, FALLBACK_CLIENT_EDGE_US),
            ewma_cross_edge_us: pick(cross_edge_us, FALLBACK_CROSS_EDGE_US),
            ewma_edge_cloud_us: pick(edge_cloud_us, FALLBACK_EDGE_CLOUD_US),
            weights: WeightInfo {
                local_hit_weight: 0.0,
                cooperative_hit_weight: 0.0,
            },
        };
        state.weights = Self::derive_weights(remote_beacon_prob, &state);
        Self {
            remote_beacon_prob,
            state: Mutex::new(state),
        }
    }

    pub fn weights(&self) -> WeightInfo {
        self.state.lock().expect("weight tuner poisoned").weights
    }

    /// Fold freshly observed latencies into the EWMAs; legs without a new
    /// observation keep their running average.
    pub fn tune(
        &self,
        client_edge_us: Option<u64>,
        cross_edge_us: Option<u64>,
        edge_cloud_us: Option<u64>,
    ) {
        let mut state = self.state.lock().expect("weight tuner poisoned");
        let fold = |ewma: f64, observed: Option<u64>| match observed {
            Some(us) if us > 0 => (1.0 - EWMA_ALPHA) * ewma + EWMA_ALPHA * us as f64,
            _ => ewma,
        };
        state.ewma_client_edge_us = fold(state.ewma_client_edge_us, client_edge_us);
        state.ewma_cross_edge_us = fold(state.ewma_cross_edge_us, cross_edge_us);
        state.ewma_edge_cloud_us = fold(state.ewma_edge_cloud_us, edge_cloud_us);
        state.weights = Self::derive_weights(self.remote_beacon_prob, &state);
    }

    fn derive_weights(remote_beacon_prob: f64, state: &TunerState) -> WeightInfo {
        let local_hit_latency = state.ewma_client_edge_us;
        let cooperative_hit_latency =
            state.ewma_client_edge_us + (remote_beacon_prob + 1.0) * state.ewma_cross_edge_us;
        let global_miss_latency = state.ewma_client_edge_us
            + remote_beacon_prob * state.ewma_cross_edge_us
            + state.ewma_edge_cloud_us;

        let weights = WeightInfo {
            local_hit_weight: global_miss_latency - local_hit_latency,
            cooperative_hit_weight: (global_miss_latency - cooperative_hit_latency).max(0.0),
        };
        debug_assert!(
            weights.local_hit_weight > weights.cooperative_hit_weight
                && weights.cooperative_hit_weight >= 0.0,
            "weight ordering violated: {:?}",
            weights
        );
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_ordering_holds() {
        let tuner = WeightTuner::new(4, 1_000, 5_000, 20_000);
        let w = tuner.weights();
        assert!(w.local_hit_weight > w.cooperative_hit_weight);
        assert!(w.cooperative_hit_weight >= 0.0);
    }

    #[test]
    fn test_zero_config_falls_back() {
        let tuner = WeightTuner::new(4, 0, 0, 0);
        let w = tuner.weights();
        assert!(w.local_hit_weight > 0.0);
    }

    #[test]
    fn test_tuning_shifts_weights_toward_observations() {
        let tuner = WeightTuner::new(4, 1_000, 5_000, 20_000);
        let before = tuner.weights();
        // A much slower cloud raises the value of any hit.
        for _ in 0..50 {
            tuner.tune(None, None, Some(200_000));
        }
        let after = tuner.weights();
        assert!(after.local_hit_weight > before.local_hit_weight);
        assert!(after.cooperative_hit_weight > before.cooperative_hit_weight);
    }

    #[test]
    fn test_missing_observations_keep_running_average() {
        let tuner = WeightTuner::new(4, 1_000, 5_000, 20_000);
        let before = tuner.weights();
        tuner.tune(None, None, None);
        assert_eq!(tuner.weights(), before);
    }
}
