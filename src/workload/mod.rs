//! Workload drivers for the simulator binary.
//!
//! Boundary interface: the CDN-trace replayer lives outside this crate.
//! The built-in synthetic driver issues a seeded, skewed get/put/del mix
//! so a cluster can be exercised end-to-end and runs stay reproducible.

use crate::config::{Config, ConfigError, WorkloadKind};
use crate::types::{Key, Value};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;

/// One client operation.
#[derive(Debug, Clone)]
pub enum OpKind {
    Get(Key),
    Put(Key, Value),
    Del(Key),
}

#[derive(Debug, Clone)]
pub struct Op {
    pub client: u32,
    pub kind: OpKind,
}

pub trait Workload: Send {
    fn next_op(&mut self) -> Op;
    fn name(&self) -> &'static str;
}

pub fn build_workload(cfg: &Config) -> Result<Box<dyn Workload>, ConfigError> {
    match cfg.workload {
        WorkloadKind::Synthetic => Ok(Box::new(SyntheticWorkload::new(cfg))),
    }
}

/// Skewed synthetic workload: most requests target a small hot set.
pub struct SyntheticWorkload {
    rng: ChaCha12Rng,
    clientcnt: u32,
    keycnt: u64,
    hot_keycnt: u64,
    hot_ratio: f64,
    get_ratio: f64,
    del_ratio: f64,
    value_min: usize,
    value_max: usize,
}

impl SyntheticWorkload {
    /// Hot set: 10% of keys draw 90% of requests.
    const HOT_FRACTION: f64 = 0.1;
    const HOT_RATIO: f64 = 0.9;

    pub fn new(cfg: &Config) -> Self {
        Self {
            rng: ChaCha12Rng::seed_from_u64(cfg.seed),
            clientcnt: cfg.clientcnt,
            keycnt: 10_000,
            hot_keycnt: ((10_000_f64) * Self::HOT_FRACTION).max(1.0) as u64,
            hot_ratio: Self::HOT_RATIO,
            get_ratio: 0.9,
            del_ratio: 0.01,
            value_min: 64,
            value_max: 4096,
        }
    }

    fn pick_key(&mut self) -> Key {
        let id = if self.rng.gen_bool(self.hot_ratio) {
            self.rng.gen_range(0..self.hot_keycnt)
        } else {
            self.rng.gen_range(self.hot_keycnt..self.keycnt)
        };
        Key::new(format!("object-{:08}", id))
    }

    fn pick_value(&mut self) -> Value {
        let size = self.rng.gen_range(self.value_min..=self.value_max);
        Value::new(vec![0xAB; size])
    }
}

impl Workload for SyntheticWorkload {
    fn next_op(&mut self) -> Op {
        let client = self.rng.gen_range(0..self.clientcnt);
        let roll: f64 = self.rng.r#gen();
        let kind = if roll < self.get_ratio {
            OpKind::Get(self.pick_key())
        } else if roll < self.get_ratio + self.del_ratio {
            OpKind::Del(self.pick_key())
        } else {
            let key = self.pick_key();
            let value = self.pick_value();
            OpKind::Put(key, value)
        };
        Op { client, kind }
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let cfg = Config::default();
        let mut a = SyntheticWorkload::new(&cfg);
        let mut b = SyntheticWorkload::new(&cfg);
        for _ in 0..100 {
            let (x, y) = (a.next_op(), b.next_op());
            assert_eq!(x.client, y.client);
            assert_eq!(
                matches!(x.kind, OpKind::Get(_)),
                matches!(y.kind, OpKind::Get(_))
            );
        }
    }

    #[test]
    fn test_ops_stay_in_client_range() {
        let cfg = Config {
            clientcnt: 3,
            edgecnt: 3,
            ..Config::default()
        };
        let mut w = SyntheticWorkload::new(&cfg);
        for _ in 0..500 {
            assert!(w.next_op().client < 3);
        }
    }
}
