use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{ClusterNode, ClusterView, Liveness, NodeRole};

/// A fixed membership which can be changed by hand.
///
/// This lets the gateway and worker APIs be tested against a known set of
/// nodes without running gossip.
pub struct StaticCluster {
    me: ClusterNode,
    members: RwLock<Vec<ClusterNode>>,
    health_score: AtomicUsize,
}

impl StaticCluster {
    /// Creates a cluster which only contains the local node.
    pub fn new(me: ClusterNode) -> Self {
        Self {
            members: RwLock::new(vec![me.clone()]),
            me,
            health_score: AtomicUsize::new(0),
        }
    }

    /// Creates a gateway with a worker for each of the given service addresses.
    pub fn gateway_with_workers(workers: impl IntoIterator<Item = SocketAddr>) -> Self {
        let me = test_node(NodeRole::Gateway, ([127, 0, 0, 1], 1).into());
        let cluster = Self::new(me);
        for addr in workers {
            cluster.add_member(test_node(NodeRole::Worker, addr));
        }
        cluster
    }

    pub fn add_member(&self, node: ClusterNode) {
        self.members.write().push(node);
    }

    /// Removes the member with the given service address.
    pub fn remove_member(&self, service_addr: SocketAddr) {
        self.members
            .write()
            .retain(|node| node.service_addr != service_addr);
    }

    pub fn set_liveness(&self, service_addr: SocketAddr, liveness: Liveness) {
        for node in self.members.write().iter_mut() {
            if node.service_addr == service_addr {
                node.liveness = liveness;
            }
        }
    }

    pub fn set_health_score(&self, score: usize) {
        self.health_score.store(score, Ordering::Relaxed);
    }
}

#[async_trait]
impl ClusterView for StaticCluster {
    fn local_node(&self) -> ClusterNode {
        self.me.clone()
    }

    async fn members(&self) -> Vec<ClusterNode> {
        self.members.read().clone()
    }

    async fn health_score(&self) -> usize {
        self.health_score.load(Ordering::Relaxed)
    }
}

/// Creates a node whose gossip and service address are the same.
pub fn test_node(role: NodeRole, service_addr: SocketAddr) -> ClusterNode {
    ClusterNode::new(
        format!("{}-{}", role, service_addr),
        service_addr,
        service_addr,
        role,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_nodes_filters_and_orders() {
        let addr_a: SocketAddr = "127.0.0.1:9003".parse().unwrap();
        let addr_b: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let addr_c: SocketAddr = "127.0.0.1:9002".parse().unwrap();

        let cluster = StaticCluster::gateway_with_workers([addr_a, addr_b, addr_c]);
        cluster.add_member(ClusterNode::new(
            "mystery",
            ([127, 0, 0, 1], 9000).into(),
            ([127, 0, 0, 1], 9000).into(),
            NodeRole::Unknown,
        ));
        cluster.set_liveness(addr_c, Liveness::Suspect);

        let workers = cluster
            .worker_nodes()
            .await
            .into_iter()
            .map(|node| node.service_addr)
            .collect::<Vec<_>>();
        assert_eq!(workers, vec![addr_b, addr_a]);
        assert_eq!(cluster.members().await.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_cluster_has_no_workers() {
        let cluster =
            StaticCluster::gateway_with_workers(std::iter::empty::<SocketAddr>());
        assert!(cluster.worker_nodes().await.is_empty());
    }
}
