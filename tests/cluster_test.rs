//! End-to-end cluster scenarios: an in-process cloud, edges, and clients
//! wired over the simulated network.

use edgecoop::cluster::Cluster;
use edgecoop::config::{CachePolicy, Config};
use edgecoop::hash::SlotHasher;
use edgecoop::types::{Hitflag, Key, Value};
use std::path::PathBuf;
use std::time::Duration;

fn test_config(name: &str, policy: CachePolicy, edgecnt: u32, capacity_bytes: u64) -> Config {
    let cloud_dir = std::env::temp_dir().join(format!(
        "edgecoop_cluster_{}_{}",
        name,
        std::process::id()
    ));
    std::fs::remove_dir_all(&cloud_dir).ok();
    Config {
        edgecnt,
        clientcnt: edgecnt,
        cache_policy: policy,
        capacity_bytes,
        cloud_dir,
        request_timeout: Duration::from_millis(500),
        ..Config::default()
    }
}

fn cleanup(dir: &PathBuf) {
    std::fs::remove_dir_all(dir).ok();
}

/// Let background placement and directory updates drain.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

/// A key whose beacon is the given edge, found by probing the shared
/// consistent hash.
fn key_beaconed_at(edge: u32, edgecnt: u32, tag: &str) -> Key {
    let hasher = SlotHasher::new();
    for i in 0..10_000u32 {
        let key = Key::new(format!("{}-{}", tag, i));
        if hasher.beacon_of(&key, edgecnt) == edge {
            return key;
        }
    }
    panic!("no key beaconed at edge {} found", edge);
}

/// Single-edge LRU at capacity 1000: three 400-byte puts overflow the
/// envelope and evict the oldest object; refetching it evicts the next
/// tail, leaving the last put and the refetched object cached.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_edge_lru_eviction_cycle() {
    let cfg = test_config("s1", CachePolicy::Lru, 1, 1000);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    let (k1, k2, k3) = (Key::from("k1"), Key::from("k2"), Key::from("k3"));
    let payload = || Value::new(vec![0u8; 400]);

    cluster.put(0, k1.clone(), payload()).await;
    cluster.put(0, k2.clone(), payload()).await;
    cluster.put(0, k3.clone(), payload()).await;
    settle().await;

    // k1 was evicted when k3 was admitted; the get falls through to the
    // cloud and still returns the written value.
    let (value, hitflag) = cluster.get(0, k1.clone()).await;
    assert_eq!(hitflag, Hitflag::GlobalMiss);
    assert_eq!(value.size_bytes(), 400);
    assert!(!value.is_deleted());
    settle().await;

    // Cache now holds {k3, k1}; k2 was the tail when k1 came back.
    let (_, h3) = cluster.get(0, k3.clone()).await;
    assert_eq!(h3, Hitflag::LocalHit);
    let (_, h1) = cluster.get(0, k1.clone()).await;
    assert_eq!(h1, Hitflag::LocalHit);

    // The capacity envelope holds at this quiescent point.
    let ctx = cluster.edges()[0].ctx();
    let used = ctx.cache.lock().await.size_bytes() + ctx.directory.size_bytes();
    assert!(used <= 1000, "capacity envelope exceeded: {}", used);

    let (_, h2) = cluster.get(0, k2.clone()).await;
    assert_eq!(h2, Hitflag::GlobalMiss);

    cluster.finish().await;
    cleanup(&dir);
}

/// Two edges: a value cached at one edge serves a peer's miss as a
/// cooperative hit through the directory and a redirected get.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cooperative_hit_across_edges() {
    let cfg = test_config("s2", CachePolicy::Lru, 2, 1 << 20);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    // Beacon at edge 0, written and cached at edge 1.
    let key = key_beaconed_at(0, 2, "coop");
    cluster.put(1, key.clone(), Value::new(vec![7u8; 256])).await;
    settle().await;

    let (_, local) = cluster.get(1, key.clone()).await;
    assert_eq!(local, Hitflag::LocalHit);

    let (value, coop) = cluster.get(0, key.clone()).await;
    assert_eq!(coop, Hitflag::CooperativeHit);
    assert_eq!(value.data(), &[7u8; 256][..]);

    let snap = cluster.stats();
    assert!(snap[0].cooperative_hits >= 1);
    assert!(snap[1].local_hits >= 1);

    cluster.finish().await;
    cleanup(&dir);
}

/// A write at one edge invalidates the copy at another; subsequent reads
/// observe the new value, never the stale copy.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_invalidates_peer_copies() {
    let cfg = test_config("s3", CachePolicy::Lru, 2, 1 << 20);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    let key = Key::from("contested");
    cluster.put(0, key.clone(), Value::new(b"v1".to_vec())).await;
    settle().await;
    let (v, h) = cluster.get(0, key.clone()).await;
    assert_eq!(h, Hitflag::LocalHit);
    assert_eq!(v.data(), b"v1");

    // Writer at the other edge.
    cluster.put(1, key.clone(), Value::new(b"v2".to_vec())).await;
    settle().await;

    // Reads from either side observe the last completed write.
    let (v, _) = cluster.get(1, key.clone()).await;
    assert_eq!(v.data(), b"v2");
    let (v, h) = cluster.get(0, key.clone()).await;
    assert_eq!(v.data(), b"v2");
    assert_ne!(h, Hitflag::LocalHit, "stale local copy served a read");

    cluster.finish().await;
    cleanup(&dir);
}

/// Deletes propagate: a deleted key reads back as a tombstone everywhere.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_reads_back_as_tombstone() {
    let cfg = test_config("del", CachePolicy::Lru, 2, 1 << 20);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    let key = Key::from("doomed");
    cluster.put(0, key.clone(), Value::new(b"payload".to_vec())).await;
    settle().await;
    cluster.del(0, key.clone()).await;
    settle().await;

    let (v, _) = cluster.get(0, key.clone()).await;
    assert!(v.is_deleted());
    let (v, _) = cluster.get(1, key.clone()).await;
    assert!(v.is_deleted());

    cluster.finish().await;
    cleanup(&dir);
}

/// BestGuess places an uncached object exactly once; the placement edge
/// then serves it locally and the directory lists only that edge.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bestguess_places_uncached_object() {
    let cfg = test_config("s4", CachePolicy::BestGuess, 2, 1 << 20);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    let key = Key::from("placed");
    cluster.put(0, key.clone(), Value::new(vec![3u8; 128])).await;
    settle().await;

    // BestGuess never admits on a put; the first get fetches from cloud
    // and triggers external placement.
    let (value, h) = cluster.get(0, key.clone()).await;
    assert_eq!(h, Hitflag::GlobalMiss);
    assert_eq!(value.size_bytes(), 128);
    settle().await;

    // Exactly one edge ended up caching the object.
    let mut holders = 0;
    for edge in cluster.edges() {
        if edge.ctx().cache.lock().await.is_cached(&key) {
            holders += 1;
        }
    }
    assert_eq!(holders, 1, "expected exactly one placement");

    // A repeat get is served without going back to the cloud.
    let (_, h) = cluster.get(0, key.clone()).await;
    assert!(matches!(h, Hitflag::LocalHit | Hitflag::CooperativeHit));

    cluster.finish().await;
    cleanup(&dir);
}

/// An object at least as large as the capacity envelope is never
/// admitted, but the get still returns its value.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_object_never_admitted() {
    let cfg = test_config("big", CachePolicy::Lru, 1, 1000);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    let key = Key::from("whale");
    cluster.put(0, key.clone(), Value::new(vec![1u8; 4000])).await;
    settle().await;

    let (value, h) = cluster.get(0, key.clone()).await;
    assert_eq!(h, Hitflag::GlobalMiss);
    assert_eq!(value.size_bytes(), 4000);
    settle().await;

    let ctx = cluster.edges()[0].ctx();
    assert!(!ctx.cache.lock().await.is_cached(&key));

    cluster.finish().await;
    cleanup(&dir);
}

/// COVERED admits only once the reward gate opens: a put alone leaves the
/// object uncached, the first get's popularity makes it worth keeping.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_covered_reward_gated_admission() {
    let cfg = test_config("covered", CachePolicy::Covered, 2, 1 << 20);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    let key = Key::from("warming");
    cluster.put(0, key.clone(), Value::new(vec![9u8; 512])).await;
    settle().await;

    let (_, first) = cluster.get(0, key.clone()).await;
    settle().await;
    let (value, second) = cluster.get(0, key.clone()).await;

    assert_eq!(first, Hitflag::GlobalMiss);
    assert_eq!(second, Hitflag::LocalHit);
    assert_eq!(value.data(), &vec![9u8; 512][..]);

    cluster.finish().await;
    cleanup(&dir);
}

/// Segcache stays within its envelope through group eviction.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_segcache_group_eviction_respects_capacity() {
    let cfg = test_config("seg", CachePolicy::Segcache, 1, 8 * 1024);
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    for i in 0..40 {
        let key = Key::new(format!("seg-{}", i));
        cluster.put(0, key, Value::new(vec![0u8; 400])).await;
    }
    settle().await;

    let ctx = cluster.edges()[0].ctx();
    let used = ctx.cache.lock().await.size_bytes() + ctx.directory.size_bytes();
    assert!(used <= 8 * 1024, "capacity envelope exceeded: {}", used);
    assert!(cluster.stats()[0].evictions > 0);

    cluster.finish().await;
    cleanup(&dir);
}

/// Greedy-dual policies run the same cooperative plumbing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_greedy_dual_policies_serve_hits() {
    for (name, policy) in [
        ("gdsf", CachePolicy::Gdsf),
        ("lfuda", CachePolicy::LfuDa),
        ("lruk", CachePolicy::LruK),
    ] {
        let cfg = test_config(name, policy, 2, 1 << 20);
        let dir = cfg.cloud_dir.clone();
        let cluster = Cluster::start(cfg).await.unwrap();

        let key = Key::new(format!("{}-hot", name));
        cluster.put(0, key.clone(), Value::new(vec![5u8; 200])).await;
        settle().await;

        let (value, h) = cluster.get(0, key.clone()).await;
        assert_eq!(h, Hitflag::LocalHit, "{} expected a local hit", name);
        assert_eq!(value.size_bytes(), 200);

        cluster.finish().await;
        cleanup(&dir);
    }
}
