//! Propagation latency model for the simulated network.
//!
//! Boundary interface: the full bandwidth/latency replay plane lives
//! outside this crate. This hook only injects configured one-way delays
//! per network leg, and measures nothing.

use crate::config::PropagationConfig;
use crate::net::transport::{CLIENT_BASE, CLOUD_IDX, CONTROL_IDX, NodeId};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Propagation {
    cfg: PropagationConfig,
}

fn is_cloud(node: NodeId) -> bool {
    node == CLOUD_IDX
}

fn is_client_side(node: NodeId) -> bool {
    node == CONTROL_IDX || (node >= CLIENT_BASE && node != CLOUD_IDX && node != CONTROL_IDX)
}

impl Propagation {
    pub fn new(cfg: PropagationConfig) -> Self {
        Self { cfg }
    }

    fn leg_micros(&self, src: NodeId, dst: NodeId) -> u64 {
        if is_cloud(src) || is_cloud(dst) {
            self.cfg.edge_cloud_us
        } else if is_client_side(src) || is_client_side(dst) {
            self.cfg.client_edge_us
        } else {
            self.cfg.cross_edge_us
        }
    }

    /// Delay one hop from `src` to `dst`.
    pub async fn propagate(&self, src: NodeId, dst: NodeId) {
        let micros = self.leg_micros(src, dst);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_classification() {
        let p = Propagation::new(PropagationConfig {
            client_edge_us: 1,
            cross_edge_us: 2,
            edge_cloud_us: 3,
        });
        assert_eq!(p.leg_micros(CLIENT_BASE, 0), 1);
        assert_eq!(p.leg_micros(0, 1), 2);
        assert_eq!(p.leg_micros(0, CLOUD_IDX), 3);
        assert_eq!(p.leg_micros(CONTROL_IDX, 0), 1);
    }
}
