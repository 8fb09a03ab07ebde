use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a worker holding a share of the cached images.
    Worker(WorkerArgs),
    /// Run a gateway routing client requests to the workers.
    Gateway(GatewayArgs),
}

#[derive(clap::Args, Debug)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    #[arg(long, default_value_t = 3)]
    /// The timeout for a single download from an origin, in seconds.
    pub origin_timeout_secs: u64,

    #[arg(long, env = "SINGLE_FLIGHT")]
    /// Let concurrent cache misses for the same URL share one origin download.
    pub single_flight: bool,
}

#[derive(clap::Args, Debug)]
pub struct GatewayArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    #[arg(long, default_value_t = 10)]
    /// The timeout for a single call to a worker, in seconds.
    pub worker_timeout_secs: u64,
}

#[derive(clap::Args, Debug)]
pub struct NodeArgs {
    #[arg(long, env = "CLUSTER_SECRET", hide_env_values = true)]
    /// The base64 encoded secret shared by every node of the cluster.
    pub secret: String,

    #[arg(long, env = "KNOWN_HOSTS", value_delimiter = ',')]
    /// The set of seed nodes, as `host[:port]`.
    ///
    /// Seeds without a port use the port of `gossip_addr`.
    pub seeds: Vec<String>,

    #[arg(long, env = "GOSSIP_ADDR", default_value = "0.0.0.0:7946")]
    /// The address for the gossip socket to bind to.
    pub gossip_addr: SocketAddr,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    /// The address for the HTTP server to listen on.
    pub http_addr: SocketAddr,

    #[arg(long, env = "ADVERTISE_HOST")]
    /// The IP other nodes use to reach this node.
    ///
    /// If not provided, the IP of the interface used for outbound traffic
    /// is detected.
    pub advertise_host: Option<IpAddr>,

    #[arg(long, env = "NAME")]
    /// The unique ID of the node, defaults to its advertised gossip address.
    pub name: Option<String>,
}

impl NodeArgs {
    /// The seeds with blank entries removed.
    pub fn seeds(&self) -> Vec<String> {
        self.seeds
            .iter()
            .map(|seed| seed.trim())
            .filter(|seed| !seed.is_empty())
            .map(|seed| seed.to_string())
            .collect()
    }

    pub fn advertise_ip(&self) -> IpAddr {
        if let Some(host) = self.advertise_host {
            return host;
        }

        let bound = self.gossip_addr.ip();
        if !bound.is_unspecified() {
            return bound;
        }

        detect_outbound_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn node_id(&self, public_gossip_addr: SocketAddr) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| public_gossip_addr.to_string())
    }
}

/// Finds the local IP the OS routes outbound traffic through.
///
/// Connecting a UDP socket sends nothing, it only selects a route.
fn detect_outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
