//! DHT-based content directory: which edges cache which keys.
//!
//! Every key has exactly one beacon edge (`SlotHasher::beacon_of`) whose
//! `DirectoryTable` authoritatively maps the key to the set of edges
//! caching it, with per-copy validity bits and an MSI-style write guard.

pub mod dirinfo;
pub mod entry;
pub mod table;

pub use dirinfo::{DirectoryInfo, DirinfoSet};
pub use entry::{DirectoryEntry, DirectoryMetadata};
pub use table::{DirectoryTable, LookupOutcome, WritelockTable};
