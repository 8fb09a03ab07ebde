//! # imgshard node
//! Cluster membership and role discovery for imgshard.
//!
//! Membership, failure detection and metadata propagation are handled by
//! [Quickwit's Chitchat](https://github.com/quickwit-oss/chitchat), gossiping over an
//! authenticated UDP transport keyed by the cluster's shared secret.
//! Each node publishes its [NodeRole] and the address of its HTTP service, which is
//! everything gateways need to route requests to workers.

mod error;
mod node;
mod seeds;
mod statistics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod transport;

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chitchat::transport::Transport;
use chitchat::{spawn_chitchat, Chitchat, ChitchatConfig, ChitchatHandle, FailureDetectorConfig, NodeId};
pub use error::NodeError;
pub use node::{ClusterNode, Liveness, NodeRole};
use parking_lot::Mutex as SyncMutex;
pub use seeds::SEED_RETRY_BACKOFF;
pub use statistics::ClusterStatistics;
use tokio::sync::{watch, Mutex};
use tokio_stream::StreamExt;
pub use transport::{SealedUdpTransport, SecretKey};
use tracing::{debug, error, info, warn};

use crate::node::{build_cluster_node, LEAVING_STATUS, ROLE_KEY, SERVICE_ADDR_KEY, STATUS_KEY};

pub static DEFAULT_CLUSTER_ID: &str = "imgshard-cluster";
const GOSSIP_INTERVAL: Duration = if cfg!(test) {
    Duration::from_millis(500)
} else {
    Duration::from_secs(1)
};
/// The number of gossip rounds a leaving node waits for its departure to spread.
const LEAVE_GOSSIP_ROUNDS: u32 = 3;

#[async_trait]
/// A read-only view of the cluster's membership.
///
/// This is what the gateway and the worker's API consume, the
/// [MembershipService] is the implementation backed by gossip.
pub trait ClusterView: Send + Sync + 'static {
    /// The node this view belongs to.
    fn local_node(&self) -> ClusterNode;

    /// All known members regardless of role, including the local node.
    async fn members(&self) -> Vec<ClusterNode>;

    /// The alive workers, ordered by their service address.
    ///
    /// Every gateway sorts the same membership the same way, so the
    /// index produced by the router means the same node everywhere.
    async fn worker_nodes(&self) -> Vec<ClusterNode> {
        let mut workers = self
            .members()
            .await
            .into_iter()
            .filter(|node| node.is_worker() && node.is_alive())
            .collect::<Vec<_>>();
        workers.sort_by(|a, b| a.service_addr.cmp(&b.service_addr));
        workers
    }

    /// The health of the local node, lower is healthier.
    async fn health_score(&self) -> usize;
}

#[derive(Debug, Clone)]
/// Configuration for the gossip network.
pub struct ConnectionConfig {
    /// The binding address for the gossip socket.
    ///
    /// This is often `0.0.0.0` + your chosen port.
    pub listen_addr: SocketAddr,

    /// The public gossip address to be broadcast to other cluster members.
    pub public_addr: SocketAddr,

    /// The address other members use to reach the node's HTTP service.
    pub service_addr: SocketAddr,

    /// A set of initial seed nodes which the node will attempt to connect to and learn of any
    /// other members in the cluster.
    ///
    /// Seeds without a port use the port of `listen_addr`.
    pub seed_nodes: Vec<String>,
}

impl ConnectionConfig {
    /// Creates a new connection config.
    pub fn new(
        listen_addr: SocketAddr,
        public_addr: SocketAddr,
        service_addr: SocketAddr,
        seeds: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        Self {
            listen_addr,
            public_addr,
            service_addr,
            seed_nodes: seeds
                .into_iter()
                .map(|seed| seed.as_ref().to_string())
                .collect(),
        }
    }
}

/// Build a cluster member using provided settings.
pub struct MembershipBuilder {
    node_id: String,
    role: NodeRole,
    connection_cfg: ConnectionConfig,
    secret: SecretKey,
    cluster_id: String,
    gossip_interval: Duration,
    failure_detector_config: FailureDetectorConfig,
    seed_retry_backoff: Duration,
}

impl MembershipBuilder {
    /// Create a new membership builder.
    pub fn new(
        node_id: impl Into<String>,
        role: NodeRole,
        connection_cfg: ConnectionConfig,
        secret: SecretKey,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            role,
            connection_cfg,
            secret,
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            gossip_interval: GOSSIP_INTERVAL,
            failure_detector_config: FailureDetectorConfig::default(),
            seed_retry_backoff: SEED_RETRY_BACKOFF,
        }
    }

    /// Set the cluster id for the given node.
    pub fn with_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    /// Set how often the node gossips with its peers.
    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }

    /// Set the failure detector settings.
    pub fn with_failure_detector_config(mut self, cfg: FailureDetectorConfig) -> Self {
        self.failure_detector_config = cfg;
        self
    }

    /// Set how long to wait before resolving unresolvable seeds again.
    pub fn with_seed_retry_backoff(mut self, backoff: Duration) -> Self {
        self.seed_retry_backoff = backoff;
        self
    }

    /// Joins the cluster over UDP, authenticating all gossip with the shared secret.
    ///
    /// A failure here is meant to be fatal, there is no retry beyond the single
    /// seed resolution retry.
    pub async fn join(self) -> Result<MembershipService, NodeError> {
        let transport = SealedUdpTransport::new(self.secret.clone());
        self.join_with_transport(&transport).await
    }

    /// Joins the cluster using a custom gossip transport.
    pub async fn join_with_transport(
        self,
        transport: &dyn Transport,
    ) -> Result<MembershipService, NodeError> {
        let seeds = seeds::normalise_seeds(
            &self.connection_cfg.seed_nodes,
            self.connection_cfg.listen_addr.port(),
        );
        let seeds = seeds::resolve_seeds(seeds, self.seed_retry_backoff).await?;

        let me = ClusterNode::new(
            self.node_id.clone(),
            self.connection_cfg.public_addr,
            self.connection_cfg.service_addr,
            self.role,
        );

        info!(
            cluster_id = %self.cluster_id,
            node_id = %me.node_id,
            role = %me.role,
            public_addr = %me.gossip_addr,
            service_addr = %me.service_addr,
            listen_gossip_addr = %self.connection_cfg.listen_addr,
            peer_seed_addrs = %seeds.join(", "),
            "Joining cluster."
        );

        let statistics = ClusterStatistics::default();
        statistics.num_live_members.store(1, Ordering::Relaxed);

        let cfg = ChitchatConfig {
            node_id: me.chitchat_id(),
            cluster_id: self.cluster_id.clone(),
            gossip_interval: self.gossip_interval,
            listen_addr: self.connection_cfg.listen_addr,
            seed_nodes: seeds,
            failure_detector_config: self.failure_detector_config,
            is_ready_predicate: None,
        };

        let chitchat_handle = spawn_chitchat(
            cfg,
            vec![
                (ROLE_KEY.to_string(), me.role.as_str().to_string()),
                (SERVICE_ADDR_KEY.to_string(), me.service_addr.to_string()),
            ],
            transport,
        )
        .await
        .map_err(|e| NodeError::ChitChat(e.to_string()))?;

        let chitchat = chitchat_handle.chitchat();
        let (ready_tx, ready_rx) = watch::channel(Vec::new());
        let stop = Arc::new(AtomicBool::new(false));

        tokio::spawn(watch_membership_changes(
            me.clone(),
            chitchat.clone(),
            statistics.clone(),
            ready_tx,
            stop.clone(),
        ));

        info!(
            node_id = %me.node_id,
            cluster_id = %self.cluster_id,
            "Cluster joined."
        );

        Ok(MembershipService {
            inner: Arc::new(MembershipInner {
                me,
                gossip_interval: self.gossip_interval,
                chitchat,
                chitchat_handle: SyncMutex::new(Some(chitchat_handle)),
                ready_nodes: ready_rx,
                statistics,
                leaving: AtomicBool::new(false),
                stop,
            }),
        })
    }
}

#[derive(Clone)]
/// A handle to the node's membership of the cluster.
///
/// The service is created once at startup and shared with whatever needs to
/// read the membership, cloning only clones the handle.
pub struct MembershipService {
    inner: Arc<MembershipInner>,
}

struct MembershipInner {
    me: ClusterNode,
    gossip_interval: Duration,
    chitchat: Arc<Mutex<Chitchat>>,
    chitchat_handle: SyncMutex<Option<ChitchatHandle>>,
    ready_nodes: watch::Receiver<Vec<NodeId>>,
    statistics: ClusterStatistics,
    leaving: AtomicBool,
    stop: Arc<AtomicBool>,
}

impl MembershipService {
    #[inline]
    /// Return the cluster member of the node itself.
    pub fn me(&self) -> &ClusterNode {
        &self.inner.me
    }

    #[inline]
    /// Gets the live cluster statistics.
    pub fn statistics(&self) -> ClusterStatistics {
        self.inner.statistics.clone()
    }

    /// Leaves the cluster.
    ///
    /// The departure is published through gossip and given up to `timeout`
    /// (capped to a few gossip rounds) to spread before chitchat is stopped,
    /// so peers drop the node straight away instead of waiting for the
    /// failure detector. Only the first call has any effect.
    pub async fn leave(&self, timeout: Duration) -> Result<(), NodeError> {
        let handle = self.inner.chitchat_handle.lock().take();
        let handle = handle.ok_or(NodeError::AlreadyLeft)?;

        info!(node_id = %self.inner.me.node_id, "Leaving the cluster.");
        self.inner.leaving.store(true, Ordering::Relaxed);
        {
            let mut chitchat = self.inner.chitchat.lock().await;
            chitchat.self_node_state().set(STATUS_KEY, LEAVING_STATUS);
        }

        let grace = timeout.min(self.inner.gossip_interval * LEAVE_GOSSIP_ROUNDS);
        tokio::time::sleep(grace).await;

        self.inner.stop.store(true, Ordering::Relaxed);
        handle
            .shutdown()
            .await
            .map_err(|e| NodeError::ChitChat(e.to_string()))?;

        info!(node_id = %self.inner.me.node_id, "Left the cluster.");
        Ok(())
    }

    /// Waits for the predicate to hold true for the cluster's members.
    pub async fn wait_for_members<F>(
        &self,
        mut predicate: F,
        timeout_after: Duration,
    ) -> Result<(), anyhow::Error>
    where
        F: FnMut(&[ClusterNode]) -> bool,
    {
        let poll = async {
            loop {
                let members = self.members().await;
                if predicate(&members) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };

        tokio::time::timeout(timeout_after, poll).await?;
        Ok(())
    }

    fn local_member(&self) -> ClusterNode {
        let mut me = self.inner.me.clone();
        if self.inner.leaving.load(Ordering::Relaxed) {
            me.liveness = Liveness::Suspect;
        }
        me
    }
}

#[async_trait]
impl ClusterView for MembershipService {
    fn local_node(&self) -> ClusterNode {
        self.local_member()
    }

    async fn members(&self) -> Vec<ClusterNode> {
        let ready = self.inner.ready_nodes.borrow().clone();
        let snapshot = self.inner.chitchat.lock().await.state_snapshot();

        let mut members = ready
            .iter()
            .filter(|node_id| node_id.id != self.inner.me.node_id)
            .filter_map(|node_id| match build_cluster_node(node_id, &snapshot) {
                Ok(member) => Some((member.node_id.clone(), member)),
                Err(error) => {
                    warn!(
                        error = %error,
                        "Failed to build cluster member from cluster state, ignoring member.",
                    );
                    None
                },
            })
            .collect::<BTreeMap<_, _>>();

        let me = self.local_member();
        members.insert(me.node_id.clone(), me);

        members.into_values().collect()
    }

    async fn health_score(&self) -> usize {
        self.inner.chitchat.lock().await.dead_nodes().count()
    }
}

/// Watches for changes in the set of live nodes.
///
/// Joins and departures are logged and the statistics kept up to date.
async fn watch_membership_changes(
    me: ClusterNode,
    chitchat: Arc<Mutex<Chitchat>>,
    statistics: ClusterStatistics,
    ready_tx: watch::Sender<Vec<NodeId>>,
    stop: Arc<AtomicBool>,
) {
    let mut node_change_rx = chitchat.lock().await.ready_nodes_watcher();
    let mut last_network_set = BTreeSet::new();

    while let Some(nodes) = node_change_rx.next().await {
        let (dead_member_count, state_snapshot) = {
            let lock = chitchat.lock().await;
            (lock.dead_nodes().count(), lock.state_snapshot())
        };

        let nodes = nodes
            .into_iter()
            .filter(|node_id| node_id.id != me.node_id)
            .collect::<Vec<_>>();
        let new_network_set = nodes
            .iter()
            .map(|node_id| (node_id.id.clone(), node_id.gossip_public_address))
            .collect::<BTreeSet<_>>();

        info!(
            self_node_id = %me.node_id,
            num_members = nodes.len() + 1,
            "Cluster membership has changed."
        );

        for (node_id, addr) in last_network_set.difference(&new_network_set) {
            info!(
                self_node_id = %me.node_id,
                target_node_id = %node_id,
                target_addr = %addr,
                "Node is no longer part of cluster."
            );
        }

        for (node_id, addr) in new_network_set.difference(&last_network_set) {
            info!(
                self_node_id = %me.node_id,
                target_node_id = %node_id,
                target_addr = %addr,
                "Node has connected to the cluster."
            );
        }

        let num_workers = nodes
            .iter()
            .filter_map(|node_id| build_cluster_node(node_id, &state_snapshot).ok())
            .filter(|member| member.is_worker())
            .count()
            + usize::from(me.is_worker());

        statistics
            .num_live_members
            .store(nodes.len() as u64 + 1, Ordering::Relaxed);
        statistics
            .num_dead_members
            .store(dead_member_count as u64, Ordering::Relaxed);
        statistics
            .num_workers
            .store(num_workers as u64, Ordering::Relaxed);

        if stop.load(Ordering::Relaxed) {
            debug!("Received a stop signal. Stopping.");
            break;
        }

        if ready_tx.send(nodes).is_err() {
            // Somehow the membership service has been dropped.
            error!("Failed to update members list. Stopping.");
            break;
        }

        last_network_set = new_network_set;
    }
}
