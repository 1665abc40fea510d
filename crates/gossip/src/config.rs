//! Transport configuration view.

use concord_types::NodeAddress;
use std::net::SocketAddr;
use std::time::Duration;

/// A federation peer's gossip endpoint.
#[derive(Debug, Clone)]
pub struct PeerEndpoint {
    pub address: NodeAddress,
    pub endpoint: SocketAddr,
}

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Local listen address for incoming gossip connections.
    pub listen_address: SocketAddr,
    /// Every other federation member's endpoint.
    pub peers: Vec<PeerEndpoint>,
    /// Per-I/O deadline for reads, writes, and ack waits.
    pub network_timeout: Duration,
    /// Idle interval after which an outgoing connection sends a keepalive.
    pub keepalive_interval: Duration,
    /// Delay between reconnection attempts to an unreachable peer.
    pub reconnect_interval: Duration,
    /// Per-peer outgoing queue depth.
    pub send_queue_capacity: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:4400".parse().expect("static addr parses"),
            peers: Vec::new(),
            network_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(20),
            reconnect_interval: Duration::from_secs(5),
            send_queue_capacity: 16,
        }
    }
}
