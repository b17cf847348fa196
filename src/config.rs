//! Cluster configuration, built once at startup and shared by handle.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Replacement / placement policy run by every edge in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Lru,
    LruK,
    GdSize,
    Gdsf,
    LfuDa,
    BestGuess,
    Segcache,
    Covered,
}

impl CachePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            CachePolicy::Lru => "lru",
            CachePolicy::LruK => "lruk",
            CachePolicy::GdSize => "gdsize",
            CachePolicy::Gdsf => "gdsf",
            CachePolicy::LfuDa => "lfuda",
            CachePolicy::BestGuess => "bestguess",
            CachePolicy::Segcache => "segcache",
            CachePolicy::Covered => "covered",
        }
    }
}

impl FromStr for CachePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lru" => Ok(CachePolicy::Lru),
            "lruk" => Ok(CachePolicy::LruK),
            "gdsize" => Ok(CachePolicy::GdSize),
            "gdsf" => Ok(CachePolicy::Gdsf),
            "lfuda" => Ok(CachePolicy::LfuDa),
            "bestguess" => Ok(CachePolicy::BestGuess),
            "segcache" => Ok(CachePolicy::Segcache),
            "covered" => Ok(CachePolicy::Covered),
            other => Err(ConfigError::UnknownCache(other.to_string())),
        }
    }
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Named workload driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Seeded skewed get/put/del mix over a bounded keyspace.
    Synthetic,
}

impl FromStr for WorkloadKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synthetic" => Ok(WorkloadKind::Synthetic),
            other => Err(ConfigError::UnknownWorkload(other.to_string())),
        }
    }
}

/// One-way propagation latencies for the simulated network legs.
///
/// Zero disables the delay entirely, which keeps unit tests fast; the
/// binary defaults model a metro-area edge deployment.
#[derive(Debug, Clone, Copy)]
pub struct PropagationConfig {
    pub client_edge_us: u64,
    pub cross_edge_us: u64,
    pub edge_cloud_us: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            client_edge_us: 0,
            cross_edge_us: 0,
            edge_cloud_us: 0,
        }
    }
}

/// Cluster-wide configuration. Constructed once in `main` (or a test
/// harness), validated, then passed around behind `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of edge nodes.
    pub edgecnt: u32,
    /// Number of clients; each client maps to edge `client % edgecnt`.
    pub clientcnt: u32,
    /// Replacement / placement policy for every edge.
    pub cache_policy: CachePolicy,
    /// Per-edge capacity envelope in bytes (cache data + metadata +
    /// beacon-owned directory entries).
    pub capacity_bytes: u64,
    /// Shard count for per-key locks and the directory table. 1 degrades
    /// to a single global lock.
    pub lock_shards: usize,
    /// Depth of every processor work queue.
    pub queue_depth: usize,
    /// Bounded wait for one cross-node request before retransmission.
    pub request_timeout: Duration,
    /// Directory of the cloud origin store.
    pub cloud_dir: PathBuf,
    /// Propagation latency model.
    pub propagation: PropagationConfig,
    /// Receive-side cache capacity for out-of-order compressed victim
    /// syncsets, per neighbor.
    pub victim_cache_capacity: usize,
    /// How many local eviction candidates each victim syncset advertises.
    pub victims_per_syncset: usize,
    /// Workload driver for the binary.
    pub workload: WorkloadKind,
    /// Total requests issued by the workload driver.
    pub request_cnt: u64,
    /// RNG seed for the workload driver (reproducible runs).
    pub seed: u64,
}

impl Config {
    /// Validate cross-field integrity. Called once before cluster bring-up;
    /// a failed check is a user configuration error, never a panic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edgecnt == 0 {
            return Err(ConfigError::ZeroEdges);
        }
        if self.clientcnt < self.edgecnt {
            return Err(ConfigError::ClientEdgeMismatch {
                clientcnt: self.clientcnt,
                edgecnt: self.edgecnt,
            });
        }
        if self.capacity_bytes == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.lock_shards == 0 || self.queue_depth == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            edgecnt: 2,
            clientcnt: 2,
            cache_policy: CachePolicy::Lru,
            capacity_bytes: 64 * 1024 * 1024,
            lock_shards: 1024,
            queue_depth: 1024,
            request_timeout: Duration::from_millis(500),
            cloud_dir: PathBuf::from("./data/cloud"),
            propagation: PropagationConfig::default(),
            victim_cache_capacity: 8,
            victims_per_syncset: 4,
            workload: WorkloadKind::Synthetic,
            request_cnt: 10_000,
            seed: 1,
        }
    }
}

/// User-visible configuration errors. The binary maps these to a non-zero
/// exit code.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("clientcnt {clientcnt} must be >= edgecnt {edgecnt} for client-edge mapping")]
    ClientEdgeMismatch { clientcnt: u32, edgecnt: u32 },
    #[error("unknown cache name: {0}")]
    UnknownCache(String),
    #[error("unknown workload name: {0}")]
    UnknownWorkload(String),
    #[error("edgecnt must be > 0")]
    ZeroEdges,
    #[error("capacity_bytes must be > 0")]
    ZeroCapacity,
    #[error("lock_shards and queue_depth must be > 0")]
    ZeroConcurrency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_names_round_trip() {
        for name in [
            "lru",
            "lruk",
            "gdsize",
            "gdsf",
            "lfuda",
            "bestguess",
            "segcache",
            "covered",
        ] {
            let policy: CachePolicy = name.parse().unwrap();
            assert_eq!(policy.name(), name);
        }
        assert!("arc".parse::<CachePolicy>().is_err());
    }

    #[test]
    fn test_client_edge_mapping_validation() {
        let cfg = Config {
            edgecnt: 4,
            clientcnt: 2,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ClientEdgeMismatch { .. })
        ));

        let cfg = Config {
            edgecnt: 4,
            clientcnt: 4,
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
