//! In-process transport between simulated nodes.
//!
//! Each node owns one inbox (a bounded MPSC channel of encoded envelopes)
//! and a `NodeLink` that can reach every other node. Requests are
//! correlated to responses by sequence number through a pending table;
//! every blocking wait is bounded, and on timeout the request is
//! retransmitted with the same sequence number while the node is still
//! running, otherwise the call returns the finish sentinel (`None`).

use super::latency::Propagation;
use super::message::{Envelope, Message, MsgHeader};
use crate::types::SeqNum;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Node index on the simulated network. Edges use their edge index;
/// clients, the control plane, and the cloud use reserved ranges.
pub type NodeId = u32;

/// The cloud origin node.
pub const CLOUD_IDX: NodeId = u32::MAX;
/// The benchmark control plane (cluster harness).
pub const CONTROL_IDX: NodeId = u32::MAX - 1;
/// Client `i` lives at `CLIENT_BASE + i`.
pub const CLIENT_BASE: NodeId = 1 << 20;

/// Base TCP port for the simulated address space.
const SIM_PORT_BASE: u16 = 20000;

/// Simulated source address for a node.
pub fn sim_addr(node: NodeId) -> SocketAddr {
    let port = SIM_PORT_BASE.wrapping_add((node % 40000) as u16);
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Routing table: every node's inbox sender, built once at cluster
/// bring-up.
#[derive(Clone, Default)]
pub struct Router {
    links: Arc<Mutex<HashMap<NodeId, mpsc::Sender<Vec<u8>>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, returning its inbox receiver.
    pub fn register(&self, node: NodeId, depth: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(depth);
        self.links
            .lock()
            .expect("router table poisoned")
            .insert(node, tx);
        rx
    }

    fn sender(&self, node: NodeId) -> Option<mpsc::Sender<Vec<u8>>> {
        self.links
            .lock()
            .expect("router table poisoned")
            .get(&node)
            .cloned()
    }
}

/// Pending request table shared between a node's link and its dispatcher.
#[derive(Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<HashMap<SeqNum, oneshot::Sender<Envelope>>>>,
}

impl PendingTable {
    fn register(&self, seqnum: SeqNum) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("pending table poisoned")
            .insert(seqnum, tx);
        rx
    }

    fn forget(&self, seqnum: SeqNum) {
        self.inner
            .lock()
            .expect("pending table poisoned")
            .remove(&seqnum);
    }

    /// Route a response envelope to its awaiting requester.
    pub fn complete(&self, env: Envelope) {
        let waiter = self
            .inner
            .lock()
            .expect("pending table poisoned")
            .remove(&env.header.seqnum);
        if let Some(tx) = waiter {
            let _ = tx.send(env);
        }
        // A missing waiter is a late duplicate after a retry; drop it.
    }
}

/// One node's handle onto the simulated network.
#[derive(Clone)]
pub struct NodeLink {
    self_idx: NodeId,
    router: Router,
    pending: PendingTable,
    seq: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    request_timeout: Duration,
    propagation: Arc<Propagation>,
}

impl NodeLink {
    pub fn new(
        self_idx: NodeId,
        router: Router,
        pending: PendingTable,
        running: Arc<AtomicBool>,
        request_timeout: Duration,
        propagation: Arc<Propagation>,
    ) -> Self {
        Self {
            self_idx,
            router,
            pending,
            seq: Arc::new(AtomicU64::new(0)),
            running,
            request_timeout,
            propagation,
        }
    }

    pub fn self_idx(&self) -> NodeId {
        self.self_idx
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn envelope(&self, seqnum: SeqNum, message: Message, background: bool) -> Envelope {
        let bandwidth_bytes = postcard::to_allocvec(&message)
            .map(|b| b.len() as u64)
            .unwrap_or(0);
        Envelope {
            header: MsgHeader {
                seqnum,
                src_idx: self.self_idx,
                src_addr: sim_addr(self.self_idx),
                bandwidth_bytes,
                background,
                skip_propagation: false,
            },
            message,
        }
    }

    async fn deliver(&self, dst: NodeId, env: &Envelope) -> bool {
        let Some(sender) = self.router.sender(dst) else {
            warn!(dst, "no route to node");
            return false;
        };
        let bytes = postcard::to_allocvec(env).expect("envelope encoding cannot fail");
        if !env.header.skip_propagation {
            self.propagation.propagate(self.self_idx, dst).await;
        }
        sender.send(bytes).await.is_ok()
    }

    /// Send a request and await its response with timeout-and-retry.
    /// Returns `None` (the finish sentinel) once the node stops running.
    pub async fn request(&self, dst: NodeId, message: Message, background: bool) -> Option<Envelope> {
        let seqnum = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let env = self.envelope(seqnum, message, background);
        loop {
            if !self.is_running() {
                return None;
            }
            let rx = self.pending.register(seqnum);
            if !self.deliver(dst, &env).await {
                self.pending.forget(seqnum);
                return None; // destination unreachable: peer shut down
            }
            match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok(rsp)) => return Some(rsp),
                Ok(Err(_)) => {
                    // Pending entry dropped: node is unwinding.
                    return None;
                }
                Err(_) => {
                    self.pending.forget(seqnum);
                    if !self.is_running() {
                        return None;
                    }
                    // Retransmit with the same sequence number.
                    warn!(
                        dst,
                        seqnum,
                        command = env.message.command(),
                        "request timed out, retransmitting"
                    );
                }
            }
        }
    }

    /// Send a response correlated to a received request.
    pub async fn respond(&self, dst: NodeId, req_seqnum: SeqNum, message: Message, background: bool) {
        let env = self.envelope(req_seqnum, message, background);
        self.deliver(dst, &env).await;
    }

    /// One-way notification; no response expected.
    pub async fn notify(&self, dst: NodeId, message: Message, background: bool) {
        let seqnum = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let env = self.envelope(seqnum, message, background);
        self.deliver(dst, &env).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropagationConfig;
    use crate::types::Key;

    fn link(idx: NodeId, router: &Router, running: Arc<AtomicBool>) -> (NodeLink, PendingTable) {
        let pending = PendingTable::default();
        let link = NodeLink::new(
            idx,
            router.clone(),
            pending.clone(),
            running,
            Duration::from_millis(100),
            Arc::new(Propagation::new(PropagationConfig::default())),
        );
        (link, pending)
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let router = Router::new();
        let running = Arc::new(AtomicBool::new(true));
        let (alice, alice_pending) = link(0, &router, running.clone());
        let (bob, _) = link(1, &router, running.clone());

        let mut alice_rx = router.register(0, 16);
        let mut bob_rx = router.register(1, 16);

        // Bob echoes every request.
        tokio::spawn(async move {
            while let Some(bytes) = bob_rx.recv().await {
                let env: Envelope = postcard::from_bytes(&bytes).unwrap();
                bob.respond(
                    env.header.src_idx,
                    env.header.seqnum,
                    Message::FinishBlockRsp,
                    false,
                )
                .await;
            }
        });
        // Alice's dispatcher routes responses to the pending table.
        tokio::spawn(async move {
            while let Some(bytes) = alice_rx.recv().await {
                let env: Envelope = postcard::from_bytes(&bytes).unwrap();
                alice_pending.complete(env);
            }
        });

        let rsp = alice
            .request(
                1,
                Message::FinishBlockReq {
                    key: Key::from("k"),
                    revalidate_edge: None,
                },
                false,
            )
            .await
            .expect("response expected");
        assert!(matches!(rsp.message, Message::FinishBlockRsp));
        assert!(rsp.header.bandwidth_bytes > 0);
    }

    #[tokio::test]
    async fn test_timeout_returns_finish_after_shutdown() {
        let router = Router::new();
        let running = Arc::new(AtomicBool::new(true));
        let (alice, _) = link(0, &router, running.clone());
        let _alice_rx = router.register(0, 16);
        let _silent_rx = router.register(1, 16); // peer never answers

        let running_flag = running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            running_flag.store(false, Ordering::Release);
        });

        let rsp = alice
            .request(1, Message::RedirectedGetReq { key: Key::from("k") }, false)
            .await;
        assert!(rsp.is_none());
    }
}
