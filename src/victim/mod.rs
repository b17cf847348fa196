//! Victim synchronization: every edge advertises its eviction candidates
//! to its neighbors so cooperative placement can reason about what the
//! cluster is about to drop.
//!
//! Syncsets piggyback on cross-edge messages as dedup-/delta-compressed
//! batches ordered by per-(sender, receiver) sequence numbers; the monitor
//! detects loss and reordering and, when recovery is impossible, enforces
//! a complete resend.

pub mod dirinfo;
pub mod monitor;
pub mod syncset;
pub mod tracker;

pub use dirinfo::{VictimDirinfo, VictimRecord};
pub use monitor::VictimsyncMonitor;
pub use syncset::{SyncsetPayload, VictimSyncset};
pub use tracker::VictimTracker;
