//! edgecoop simulator binary.
//!
//! Brings up a cloud origin, N edge nodes, and M clients in one process,
//! drives a workload against the closest-edge mapping, and dumps per-edge
//! hit statistics on finish.

use clap::Parser;
use edgecoop::cluster::Cluster;
use edgecoop::config::{Config, PropagationConfig};
use edgecoop::workload::{OpKind, build_workload};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "edgecoop", version, about = "Cooperative edge caching simulator")]
struct Args {
    /// Cache method: lru, lruk, gdsize, gdsf, lfuda, bestguess, segcache,
    /// covered
    #[arg(short, long, default_value = "lru")]
    cache: String,

    /// Number of edge nodes
    #[arg(short, long, default_value = "4")]
    edgecnt: u32,

    /// Number of clients (must be >= edgecnt)
    #[arg(long, default_value = "4")]
    clientcnt: u32,

    /// Per-edge capacity envelope in bytes
    #[arg(long, default_value = "67108864")]
    capacity_bytes: u64,

    /// Workload name
    #[arg(short, long, default_value = "synthetic")]
    workload: String,

    /// Number of requests to issue
    #[arg(short, long, default_value = "10000")]
    requests: u64,

    /// Data directory (cloud store lives under it)
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Workload RNG seed
    #[arg(long, default_value = "1")]
    seed: u64,

    /// One-way client-edge propagation latency (us)
    #[arg(long, default_value = "1000")]
    client_edge_us: u64,

    /// One-way cross-edge propagation latency (us)
    #[arg(long, default_value = "5000")]
    cross_edge_us: u64,

    /// One-way edge-cloud propagation latency (us)
    #[arg(long, default_value = "20000")]
    edge_cloud_us: u64,
}

impl Args {
    fn into_config(self) -> Result<Config, edgecoop::ConfigError> {
        let cfg = Config {
            edgecnt: self.edgecnt,
            clientcnt: self.clientcnt,
            cache_policy: self.cache.parse()?,
            capacity_bytes: self.capacity_bytes,
            workload: self.workload.parse()?,
            request_cnt: self.requests,
            cloud_dir: self.data_dir.join("cloud"),
            seed: self.seed,
            request_timeout: Duration::from_millis(500),
            propagation: PropagationConfig {
                client_edge_us: self.client_edge_us,
                cross_edge_us: self.cross_edge_us,
                edge_cloud_us: self.edge_cloud_us,
            },
            ..Config::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("edgecoop=info".parse().expect("static directive parses")),
        )
        .init();

    let args = Args::parse();
    let cfg = match args.into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::from(1);
        }
    };

    let mut workload = match build_workload(&cfg) {
        Ok(w) => w,
        Err(e) => {
            error!("invalid workload: {}", e);
            return ExitCode::from(1);
        }
    };

    info!(
        policy = %cfg.cache_policy,
        edges = cfg.edgecnt,
        clients = cfg.clientcnt,
        capacity = cfg.capacity_bytes,
        requests = cfg.request_cnt,
        "starting simulation"
    );

    let cluster = match Cluster::start(cfg.clone()).await {
        Ok(c) => c,
        Err(e) => {
            error!("cluster bring-up failed: {}", e);
            return ExitCode::from(1);
        }
    };

    for i in 0..cfg.request_cnt {
        let op = workload.next_op();
        match op.kind {
            OpKind::Get(key) => {
                cluster.get(op.client, key).await;
            }
            OpKind::Put(key, value) => {
                cluster.put(op.client, key, value).await;
            }
            OpKind::Del(key) => {
                cluster.del(op.client, key).await;
            }
        }
        if (i + 1) % 1000 == 0 {
            info!("{} / {} requests", i + 1, cfg.request_cnt);
        }
    }

    let stats = cluster.finish().await;
    let mut total_gets = 0u64;
    let mut total_local = 0u64;
    let mut total_coop = 0u64;
    for (idx, snap) in stats.iter().enumerate() {
        info!(
            edge = idx,
            local_hits = snap.local_hits,
            cooperative_hits = snap.cooperative_hits,
            global_misses = snap.global_misses,
            evictions = snap.evictions,
            bandwidth_bytes = snap.bandwidth_bytes,
            "edge statistics"
        );
        total_gets += snap.gets();
        total_local += snap.local_hits;
        total_coop += snap.cooperative_hits;
    }
    if total_gets > 0 {
        info!(
            "hit ratio: {:.2}% local, {:.2}% cooperative",
            100.0 * total_local as f64 / total_gets as f64,
            100.0 * total_coop as f64 / total_gets as f64,
        );
    }
    ExitCode::SUCCESS
}
