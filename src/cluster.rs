//! In-process cluster harness: cloud origin, edge nodes, and client
//! endpoints wired over the simulated network.

use crate::cloud::{CloudError, CloudServer, CloudStore};
use crate::config::{Config, ConfigError};
use crate::edge::EdgeWrapper;
use crate::net::transport::{CLIENT_BASE, CONTROL_IDX, PendingTable};
use crate::net::{CLOUD_IDX, ControlOp, Envelope, Message, NodeLink, Propagation, Router};
use crate::stats::EdgeStatsSnapshot;
use crate::types::{EdgeIdx, Hitflag, Key, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

/// Clients and the control plane wait longer than edge-internal calls: a
/// foreground write spans a write-lock grant plus an invalidation fan-out.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

struct Endpoint {
    link: NodeLink,
    dispatcher: JoinHandle<()>,
}

impl Endpoint {
    /// A request-only node (client or control plane): its dispatcher just
    /// routes responses to the pending table.
    fn spawn(
        node: u32,
        router: &Router,
        running: Arc<AtomicBool>,
        propagation: Arc<Propagation>,
        depth: usize,
    ) -> Self {
        let pending = PendingTable::default();
        let mut inbox = router.register(node, depth);
        let link = NodeLink::new(
            node,
            router.clone(),
            pending.clone(),
            running,
            CLIENT_TIMEOUT,
            propagation,
        );
        let dispatcher = tokio::spawn(async move {
            while let Some(bytes) = inbox.recv().await {
                let env: Envelope =
                    postcard::from_bytes(&bytes).expect("malformed envelope on a client inbox");
                if env.message.is_response() {
                    pending.complete(env);
                }
            }
        });
        Self { link, dispatcher }
    }
}

/// A running simulation: one cloud, `edgecnt` edges, `clientcnt` clients.
pub struct Cluster {
    cfg: Arc<Config>,
    edges: Vec<EdgeWrapper>,
    clients: Vec<Endpoint>,
    control: Endpoint,
    cloud_running: Arc<AtomicBool>,
    cloud_handle: JoinHandle<()>,
}

impl Cluster {
    pub async fn start(cfg: Config) -> Result<Self, ClusterError> {
        cfg.validate()?;
        let cfg = Arc::new(cfg);
        let router = Router::new();
        let propagation = Arc::new(Propagation::new(cfg.propagation));

        // Cloud origin.
        let cloud_running = Arc::new(AtomicBool::new(true));
        let cloud_inbox = router.register(CLOUD_IDX, cfg.queue_depth);
        let cloud_link = NodeLink::new(
            CLOUD_IDX,
            router.clone(),
            PendingTable::default(),
            cloud_running.clone(),
            cfg.request_timeout,
            propagation.clone(),
        );
        let store = CloudStore::open(&cfg.cloud_dir)?;
        let cloud_handle = tokio::spawn(
            CloudServer::new(store, cloud_link, cloud_inbox, cloud_running.clone()).run(),
        );

        // Edges.
        let edges = (0..cfg.edgecnt)
            .map(|idx| EdgeWrapper::spawn(cfg.clone(), idx, router.clone(), propagation.clone()))
            .collect();

        // Clients and the control plane.
        let clients = (0..cfg.clientcnt)
            .map(|i| {
                Endpoint::spawn(
                    CLIENT_BASE + i,
                    &router,
                    Arc::new(AtomicBool::new(true)),
                    propagation.clone(),
                    cfg.queue_depth,
                )
            })
            .collect();
        let control = Endpoint::spawn(
            CONTROL_IDX,
            &router,
            Arc::new(AtomicBool::new(true)),
            propagation.clone(),
            cfg.queue_depth,
        );

        info!(
            edges = cfg.edgecnt,
            clients = cfg.clientcnt,
            policy = %cfg.cache_policy,
            "cluster started"
        );
        Ok(Self {
            cfg,
            edges,
            clients,
            control,
            cloud_running,
            cloud_handle,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.cfg
    }

    /// Every client talks to its closest edge; with `clientcnt ==
    /// edgecnt` the mapping is a bijection.
    pub fn edge_of_client(&self, client: u32) -> EdgeIdx {
        client % self.cfg.edgecnt
    }

    pub async fn get(&self, client: u32, key: Key) -> (Value, Hitflag) {
        let edge = self.edge_of_client(client);
        let rsp = self.clients[client as usize]
            .link
            .request(edge, Message::LocalGetReq { key }, false)
            .await;
        match rsp.map(|env| env.message) {
            Some(Message::LocalGetRsp { value, hitflag, .. }) => (value, hitflag),
            _ => (Value::tombstone(), Hitflag::GlobalMiss),
        }
    }

    pub async fn put(&self, client: u32, key: Key, value: Value) {
        let edge = self.edge_of_client(client);
        self.clients[client as usize]
            .link
            .request(edge, Message::LocalPutReq { key, value }, false)
            .await;
    }

    pub async fn del(&self, client: u32, key: Key) {
        let edge = self.edge_of_client(client);
        self.clients[client as usize]
            .link
            .request(edge, Message::LocalDelReq { key }, false)
            .await;
    }

    pub fn edges(&self) -> &[EdgeWrapper] {
        &self.edges
    }

    pub fn stats(&self) -> Vec<EdgeStatsSnapshot> {
        self.edges.iter().map(|e| e.stats().snapshot()).collect()
    }

    /// Clean finish: tell every edge to stop, then tear the cluster down.
    pub async fn finish(mut self) -> Vec<EdgeStatsSnapshot> {
        for edge in &self.edges {
            self.control
                .link
                .request(edge.idx(), Message::ControlReq { op: ControlOp::FinishRun }, false)
                .await;
        }
        let stats = self.stats();

        for edge in &mut self.edges {
            edge.shutdown().await;
        }
        self.cloud_running.store(false, Ordering::Release);
        let _ = tokio::time::timeout(Duration::from_secs(2), self.cloud_handle).await;
        for client in &self.clients {
            client.dispatcher.abort();
        }
        self.control.dispatcher.abort();
        info!("cluster finished");
        stats
    }
}
