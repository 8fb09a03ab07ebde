use std::fmt::{self, Display};
use std::net::SocketAddr;

use chitchat::{ClusterStateSnapshot, NodeId};

pub(crate) static ROLE_KEY: &str = "role";
pub(crate) static SERVICE_ADDR_KEY: &str = "service_addr";
pub(crate) static STATUS_KEY: &str = "status";
pub(crate) static LEAVING_STATUS: &str = "leaving";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// The part a node plays in the cluster.
///
/// The role is advertised as gossip metadata and decoded once when
/// the member is read, anything unrecognised becomes [NodeRole::Unknown].
pub enum NodeRole {
    /// Client facing node routing requests to workers.
    Gateway,
    /// Node holding a cache and fetching from origins.
    Worker,
    Unknown,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Gateway => "gateway",
            NodeRole::Worker => "worker",
            NodeRole::Unknown => "unknown",
        }
    }

    /// Decodes the role from its metadata value.
    pub fn decode(value: Option<&str>) -> Self {
        match value {
            Some("gateway") => NodeRole::Gateway,
            Some("worker") => NodeRole::Worker,
            _ => NodeRole::Unknown,
        }
    }
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
/// The liveness of a member as seen through gossip.
///
/// Members the failure detector holds as dead are not members any more,
/// they only show up in the health score.
pub enum Liveness {
    Alive,
    /// The node is still reachable but has announced that it is leaving.
    Suspect,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterNode {
    /// A unique ID for the given node in the cluster.
    pub node_id: String,
    /// The address the node gossips on.
    pub gossip_addr: SocketAddr,
    /// The address the node serves HTTP requests on.
    pub service_addr: SocketAddr,
    pub role: NodeRole,
    pub liveness: Liveness,
}

impl ClusterNode {
    pub fn new(
        node_id: impl Into<String>,
        gossip_addr: SocketAddr,
        service_addr: SocketAddr,
        role: NodeRole,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            gossip_addr,
            service_addr,
            role,
            liveness: Liveness::Alive,
        }
    }

    #[inline]
    pub fn is_worker(&self) -> bool {
        self.role == NodeRole::Worker
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }

    pub(crate) fn chitchat_id(&self) -> NodeId {
        NodeId::new(self.node_id.clone(), self.gossip_addr)
    }
}

/// Builds a member from the gossip state the node has published.
pub(crate) fn build_cluster_node(
    chitchat_id: &NodeId,
    state: &ClusterStateSnapshot,
) -> Result<ClusterNode, String> {
    let node_state = state.node_states.get(&chitchat_id.id).ok_or_else(|| {
        format!(
            "Could not find node ID `{}` in ChitChat state.",
            chitchat_id.id
        )
    })?;

    let service_addr = node_state
        .get(SERVICE_ADDR_KEY)
        .ok_or_else(|| format!("Node `{}` has no service address.", chitchat_id.id))?
        .parse::<SocketAddr>()
        .map_err(|e| format!("Invalid service address: {}", e))?;

    let role = NodeRole::decode(node_state.get(ROLE_KEY));
    let liveness = if node_state.get(STATUS_KEY) == Some(LEAVING_STATUS) {
        Liveness::Suspect
    } else {
        Liveness::Alive
    };

    Ok(ClusterNode {
        node_id: chitchat_id.id.clone(),
        gossip_addr: chitchat_id.gossip_public_address,
        service_addr,
        role,
        liveness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_decode() {
        assert_eq!(NodeRole::decode(Some("worker")), NodeRole::Worker);
        assert_eq!(NodeRole::decode(Some("gateway")), NodeRole::Gateway);
        assert_eq!(NodeRole::decode(Some("{\"label\":\"worker\"}")), NodeRole::Unknown);
        assert_eq!(NodeRole::decode(None), NodeRole::Unknown);
    }

    #[test]
    fn test_role_display_matches_metadata() {
        for role in [NodeRole::Gateway, NodeRole::Worker] {
            assert_eq!(NodeRole::decode(Some(&role.to_string())), role);
        }
    }
}
