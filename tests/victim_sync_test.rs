//! Victim synchronization across a live cluster, plus the public
//! compression laws.

use edgecoop::cluster::Cluster;
use edgecoop::config::{CachePolicy, Config};
use edgecoop::directory::{DirectoryInfo, DirinfoSet};
use edgecoop::types::{Hitflag, Key, Value};
use edgecoop::victim::{VictimRecord, VictimSyncset, VictimsyncMonitor};
use std::time::Duration;

fn covered_config(name: &str) -> Config {
    let cloud_dir = std::env::temp_dir().join(format!(
        "edgecoop_victim_{}_{}",
        name,
        std::process::id()
    ));
    std::fs::remove_dir_all(&cloud_dir).ok();
    Config {
        edgecnt: 2,
        clientcnt: 2,
        cache_policy: CachePolicy::Covered,
        capacity_bytes: 1 << 20,
        cloud_dir,
        ..Config::default()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

/// A redirected get's response piggybacks the target edge's victim
/// syncset; the sender installs the neighbor view into its tracker.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redirected_get_carries_victim_syncset() {
    let cfg = covered_config("piggyback");
    let dir = cfg.cloud_dir.clone();
    let cluster = Cluster::start(cfg).await.unwrap();

    let key = Key::from("nominated");
    cluster.put(1, key.clone(), Value::new(vec![2u8; 300])).await;
    settle().await;

    // First get at edge 1 fetches and admits (reward gate opens on the
    // miss popularity); the victim nomination follows.
    let (_, h) = cluster.get(1, key.clone()).await;
    assert_eq!(h, Hitflag::GlobalMiss);
    settle().await;

    // Edge 0's miss redirects to edge 1; the response carries edge 1's
    // syncset.
    let (_, h) = cluster.get(0, key.clone()).await;
    assert_eq!(h, Hitflag::CooperativeHit);
    settle().await;

    let ctx0 = cluster.edges()[0].ctx();
    let tracker = ctx0.coop.tracker().read().await;
    let view = tracker
        .neighbor_view(1)
        .expect("edge 0 should hold edge 1's victim view");
    assert!(
        view.contains_key(&key),
        "edge 1's nominated victim should be visible at edge 0"
    );
    drop(tracker);

    cluster.finish().await;
    std::fs::remove_dir_all(&dir).ok();
}

fn record(key: &str, edges: &[u32]) -> VictimRecord {
    VictimRecord::new(
        Key::from(key),
        0,
        DirinfoSet::complete(edges.iter().map(|&e| DirectoryInfo::new(e))),
    )
}

/// The public round-trip law: compress(current, previous) recovered
/// against previous yields current, for syncsets and dirinfo sets alike.
#[test]
fn test_compression_round_trip_laws() {
    let prev_set = DirinfoSet::complete([DirectoryInfo::new(0), DirectoryInfo::new(1)]);
    let cur_set = DirinfoSet::complete([DirectoryInfo::new(1), DirectoryInfo::new(2)]);
    assert_eq!(
        DirinfoSet::compress(&cur_set, &prev_set).recover(&prev_set),
        cur_set
    );

    let prev = VictimSyncset::complete(3, vec![record("a", &[0]), record("b", &[0, 1])]);
    let cur = VictimSyncset::complete(4, vec![record("b", &[1]), record("c", &[2])]);
    let recovered = VictimSyncset::compress(&cur, &prev).recover(&prev);
    assert_eq!(recovered.seqnum, 4);
    let mut keys: Vec<Key> = recovered.records().iter().map(|r| r.key.clone()).collect();
    keys.sort();
    assert_eq!(keys, vec![Key::from("b"), Key::from("c")]);
}

/// Sequence numbers stay monotone per (sender, receiver) even across an
/// enforcement reset.
#[test]
fn test_seqnums_monotone_across_enforcement() {
    let mut sender = VictimsyncMonitor::new(1);
    let mut receiver = VictimsyncMonitor::new(1);

    let mut last_seq = 0;
    let stream: Vec<VictimSyncset> = (0..6)
        .map(|i| sender.next_outbound(vec![record(&format!("k{}", i), &[0])]))
        .collect();
    for syncset in &stream {
        assert!(syncset.seqnum > last_seq);
        last_seq = syncset.seqnum;
    }

    // Deliver only the first and the last two: the gap forces an
    // enforcement round, after which numbering continues monotonically.
    receiver.on_receive(stream[0].clone());
    receiver.on_receive(stream[4].clone());
    receiver.on_receive(stream[5].clone());
    assert!(receiver.needs_enforcement());

    let flagged = receiver.next_outbound(vec![record("r", &[1])]);
    sender.on_receive(flagged);
    let reset = sender.next_outbound(vec![record("k6", &[0])]);
    assert!(reset.is_complete());
    assert!(reset.seqnum > last_seq);
    assert_eq!(receiver.on_receive(reset).len(), 1);
}
