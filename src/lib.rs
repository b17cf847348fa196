//! Cooperative geo-distributed edge caching simulator.
//!
//! Clients issue get/put/del to their closest edge node; edges hold a
//! bounded local cache and cooperate through a DHT-style content
//! directory so a miss at one edge can be served by a peer instead of the
//! cloud origin. Several replacement/placement methods are bundled behind
//! one cache contract.

pub mod cache;
pub mod cloud;
pub mod cluster;
pub mod concurrency;
pub mod config;
pub mod directory;
pub mod edge;
pub mod hash;
pub mod net;
pub mod stats;
pub mod types;
pub mod victim;
pub mod workload;

pub use cache::{CacheWrapper, LocalCache, LocalGet};
pub use cloud::{CloudError, CloudServer, CloudStore};
pub use cluster::{Cluster, ClusterError};
pub use concurrency::{PerKeyRwLock, PopOutcome, QueueError, WorkReceiver, WorkSender};
pub use config::{CachePolicy, Config, ConfigError, PropagationConfig, WorkloadKind};
pub use directory::{
    DirectoryEntry, DirectoryInfo, DirectoryMetadata, DirectoryTable, DirinfoSet, LookupOutcome,
    WritelockTable,
};
pub use edge::{CacheManager, CooperationWrapper, EdgeWrapper, WeightInfo, WeightTuner};
pub use hash::SlotHasher;
pub use net::{Envelope, Message, NodeLink, Propagation, Router};
pub use stats::{EdgeStats, EdgeStatsSnapshot};
pub use types::{EdgeIdx, Hitflag, Key, SeqNum, VTime, Value, now};
pub use victim::{VictimDirinfo, VictimRecord, VictimSyncset, VictimTracker, VictimsyncMonitor};
pub use workload::{Op, OpKind, Workload, build_workload};
