//! Bounded work queues feeding the per-edge processor tasks.
//!
//! Every processor (foreground worker, redirection, invalidation,
//! placement, beacon) drains one of these. Producers on the foreground
//! path use the awaiting `push` (back-pressure); producers on background
//! paths use `try_push` and treat `Overflow` as fatal at the call site,
//! because a dropped background item means silent data loss.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is full. Only reported by `try_push`.
    #[error("work queue overflow")]
    Overflow,
    /// The consumer is gone (node shut down).
    #[error("work queue closed")]
    Closed,
}

/// Outcome of a bounded-wait pop. Loop heads check the running flag on
/// `Timeout` and unwind on `Closed`.
#[derive(Debug)]
pub enum PopOutcome<T> {
    Item(T),
    Timeout,
    Closed,
}

pub struct WorkSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for WorkSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> WorkSender<T> {
    /// Non-blocking push; `Overflow` when the ring is full.
    pub fn try_push(&self, item: T) -> Result<(), QueueError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Overflow,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Awaiting push; blocks the producer until a slot frees up.
    pub async fn push(&self, item: T) -> Result<(), QueueError> {
        self.tx.send(item).await.map_err(|_| QueueError::Closed)
    }
}

pub struct WorkReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> WorkReceiver<T> {
    /// Pop with a bounded wait so the consumer can observe shutdown.
    pub async fn pop(&mut self, wait: Duration) -> PopOutcome<T> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(item)) => PopOutcome::Item(item),
            Ok(None) => PopOutcome::Closed,
            Err(_) => PopOutcome::Timeout,
        }
    }
}

/// Build a bounded MPSC work queue of the given depth.
pub fn work_queue<T>(depth: usize) -> (WorkSender<T>, WorkReceiver<T>) {
    let (tx, rx) = mpsc::channel(depth);
    (WorkSender { tx }, WorkReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overflow_reported() {
        let (tx, _rx) = work_queue::<u32>(2);
        assert!(tx.try_push(1).is_ok());
        assert!(tx.try_push(2).is_ok());
        assert!(matches!(tx.try_push(3), Err(QueueError::Overflow)));
    }

    #[tokio::test]
    async fn test_pop_timeout_then_item() {
        let (tx, mut rx) = work_queue::<u32>(4);
        match rx.pop(Duration::from_millis(10)).await {
            PopOutcome::Timeout => {}
            other => panic!("expected timeout, got {:?}", other),
        }
        tx.push(7).await.unwrap();
        match rx.pop(Duration::from_millis(100)).await {
            PopOutcome::Item(7) => {}
            other => panic!("expected item, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_on_sender_drop() {
        let (tx, mut rx) = work_queue::<u32>(4);
        drop(tx);
        assert!(matches!(
            rx.pop(Duration::from_millis(50)).await,
            PopOutcome::Closed
        ));
    }
}
