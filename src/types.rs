//! Core data model shared by every subsystem.
//!
//! # Design Goals
//!
//! 1. **Byte-exact accounting**: keys and values expose their wire/storage
//!    footprint so cache and directory capacity envelopes stay accurate.
//!
//! 2. **Opaque payloads**: the simulator only ever inspects sizes and the
//!    deleted bit; value contents are carried for wire realism, never parsed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of an edge node inside the cluster. Beacon ownership, directory
/// infos, and placement decisions all speak in edge indices.
pub type EdgeIdx = u32;

/// Monotonic per-(sender, receiver) sequence number for victim
/// synchronization. 64 bits are assumed not to wrap within a run.
pub type SeqNum = u64;

/// Per-edge virtual time, advanced on every cache access at that edge.
/// Used as a cross-edge recency proxy by the BestGuess placement policy.
pub type VTime = u64;

/// Fixed bookkeeping charged per lookup-index entry (map slot + iterator
/// analogue) when accounting cache size in bytes.
pub const LOOKUP_ENTRY_OVERHEAD: u64 = 16;

/// Fixed bookkeeping charged per ordered-score entry in the greedy-dual
/// family (score key + ordering slot).
pub const SCORE_ENTRY_OVERHEAD: u64 = 16;

/// Opaque, comparable, hashable cache key with a measurable byte length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes, used for capacity accounting.
    pub fn len_bytes(&self) -> u64 {
        self.0.len() as u64
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Opaque byte blob with a deleted bit. The simulator uses the size for
/// capacity accounting; the bytes ride the wire for realism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    data: Vec<u8>,
    deleted: bool,
}

impl Value {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            deleted: false,
        }
    }

    /// Tombstone value returned for deleted or never-written keys.
    pub fn tombstone() -> Self {
        Self {
            data: Vec::new(),
            deleted: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// How a get was served, as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hitflag {
    /// Served from the closest edge's own cache.
    LocalHit,
    /// Served by a peer edge via a redirected get.
    CooperativeHit,
    /// A peer edge holds the key but the copy is currently invalid.
    CooperativeInvalid,
    /// No edge held a valid copy; the cloud origin answered.
    GlobalMiss,
}

impl fmt::Display for Hitflag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Hitflag::LocalHit => "local-hit",
            Hitflag::CooperativeHit => "cooperative-hit",
            Hitflag::CooperativeInvalid => "cooperative-invalid",
            Hitflag::GlobalMiss => "global-miss",
        };
        write!(f, "{}", s)
    }
}

/// Current unix time in seconds.
pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_accounting() {
        let key = Key::from("object-17");
        assert_eq!(key.len_bytes(), 9);
        assert_eq!(key.as_bytes(), b"object-17");
    }

    #[test]
    fn test_tombstone_is_empty_and_deleted() {
        let v = Value::tombstone();
        assert!(v.is_deleted());
        assert_eq!(v.size_bytes(), 0);

        let v = Value::new(vec![0u8; 128]);
        assert!(!v.is_deleted());
        assert_eq!(v.size_bytes(), 128);
    }
}
