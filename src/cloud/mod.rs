//! The cloud origin store: authoritative key-value state behind every
//! edge, backed by an embedded sled database.
//!
//! Deletes write tombstones rather than removing keys, so a get for a
//! deleted or never-written key always yields a value (the tombstone) and
//! the client-facing contract that every get returns something holds.

use crate::concurrency::{PopOutcome, QueueError};
use crate::net::{Envelope, Message, NodeLink};
use crate::types::{Key, Value};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud store i/o: {0}")]
    Store(#[from] sled::Error),
    #[error("cloud value encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("cloud queue: {0}")]
    Queue(#[from] QueueError),
}

/// Embedded KV store holding the origin copy of every key.
pub struct CloudStore {
    db: sled::Db,
}

impl CloudStore {
    pub fn open(path: &Path) -> Result<Self, CloudError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Origin read; unknown keys yield a tombstone.
    pub fn get(&self, key: &Key) -> Result<Value, CloudError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(Value::tombstone()),
        }
    }

    pub fn put(&self, key: &Key, value: &Value) -> Result<(), CloudError> {
        let bytes = bincode::serialize(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Delete by writing a tombstone.
    pub fn del(&self, key: &Key) -> Result<(), CloudError> {
        self.put(key, &Value::tombstone())
    }

    pub fn flush(&self) -> Result<(), CloudError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Poll interval for the cloud inbox (bounds the shutdown latency).
const INBOX_POLL: Duration = Duration::from_millis(100);

/// The cloud-side request loop: serves GlobalGet/GlobalPut/GlobalDel.
pub struct CloudServer {
    store: CloudStore,
    link: NodeLink,
    inbox: mpsc::Receiver<Vec<u8>>,
    running: Arc<AtomicBool>,
}

impl CloudServer {
    pub fn new(
        store: CloudStore,
        link: NodeLink,
        inbox: mpsc::Receiver<Vec<u8>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            link,
            inbox,
            running,
        }
    }

    pub async fn run(mut self) {
        info!("cloud origin store running");
        loop {
            let outcome = match tokio::time::timeout(INBOX_POLL, self.inbox.recv()).await {
                Ok(Some(bytes)) => PopOutcome::Item(bytes),
                Ok(None) => PopOutcome::Closed,
                Err(_) => PopOutcome::Timeout,
            };
            match outcome {
                PopOutcome::Item(bytes) => {
                    let env: Envelope = postcard::from_bytes(&bytes)
                        .expect("malformed envelope on the cloud inbox");
                    self.handle(env).await;
                }
                PopOutcome::Timeout => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                }
                PopOutcome::Closed => break,
            }
        }
        if let Err(e) = self.store.flush() {
            error!("cloud flush on shutdown failed: {}", e);
        }
        info!("cloud origin store stopped");
    }

    async fn handle(&self, env: Envelope) {
        let src = env.header.src_idx;
        let seqnum = env.header.seqnum;
        let background = env.header.background;
        match env.message {
            Message::GlobalGetReq { key } => {
                let value = self.store.get(&key).unwrap_or_else(|e| {
                    error!(key = %key, "cloud get failed: {}", e);
                    Value::tombstone()
                });
                debug!(key = %key, deleted = value.is_deleted(), "global get");
                self.link
                    .respond(src, seqnum, Message::GlobalGetRsp { key, value }, background)
                    .await;
            }
            Message::GlobalPutReq { key, value } => {
                if let Err(e) = self.store.put(&key, &value) {
                    error!(key = %key, "cloud put failed: {}", e);
                }
                self.link
                    .respond(src, seqnum, Message::GlobalPutRsp { key }, background)
                    .await;
            }
            Message::GlobalDelReq { key } => {
                if let Err(e) = self.store.del(&key) {
                    error!(key = %key, "cloud del failed: {}", e);
                }
                self.link
                    .respond(src, seqnum, Message::GlobalDelRsp { key }, background)
                    .await;
            }
            other => {
                // The cloud only speaks the global data plane.
                unreachable!("unexpected message at cloud: {}", other.command());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> (CloudStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "edgecoop_cloud_test_{}_{}",
            std::process::id(),
            crate::types::now()
        ));
        (CloudStore::open(&dir).unwrap(), dir)
    }

    #[test]
    fn test_put_get_del_round_trip() {
        let (store, dir) = scratch_store();
        let key = Key::from("k");

        assert!(store.get(&key).unwrap().is_deleted());

        store.put(&key, &Value::new(b"v1".to_vec())).unwrap();
        let got = store.get(&key).unwrap();
        assert!(!got.is_deleted());
        assert_eq!(got.data(), b"v1");

        store.del(&key).unwrap();
        assert!(store.get(&key).unwrap().is_deleted());

        drop(store);
        std::fs::remove_dir_all(dir).ok();
    }
}
