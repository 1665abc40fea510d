//! Gossip transport for the Concord federation.
//!
//! The transport delivers opaque payload vectors between named peers and
//! broadcasts to all peers. Two implementations share the same dispatch
//! semantics:
//!
//! - [`TcpTransport`]: the production transport. One outgoing connection
//!   per peer with its own send serialization, a listener accepting
//!   incoming connections, and per-I/O deadlines from configuration.
//! - [`InMemoryNetwork`]: an in-process hub wiring several nodes together
//!   for multi-node tests without sockets.
//!
//! Incoming messages are routed by topic onto dedicated bounded queues
//! (capacity [`TOPIC_QUEUE_CAPACITY`]); a single consumer task per topic
//! invokes the registered listener serially, preserving per-topic FIFO
//! order. Cross-topic ordering is not preserved.

mod client;
mod config;
mod dispatcher;
mod frame;
mod memory;
pub mod metrics;
mod server;
mod tcp;

pub use config::{GossipConfig, PeerEndpoint};
pub use dispatcher::{Dispatcher, TOPIC_QUEUE_CAPACITY};
pub use frame::{FrameError, ACK, MAX_PAYLOADS_IN_MESSAGE, MAX_PAYLOAD_SIZE_BYTES};
pub use memory::{InMemoryNetwork, InMemoryTransport};
pub use tcp::TcpTransport;

use async_trait::async_trait;
use concord_messages::{GossipHeader, RecipientMode, Topic};
use concord_types::NodeAddress;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives messages for one topic. Invoked serially by the topic's
/// consumer task; a slow listener backpressures only its own topic.
#[async_trait]
pub trait GossipListener: Send + Sync {
    async fn on_message(&self, header: GossipHeader, payloads: Vec<Vec<u8>>);
}

/// The send/broadcast primitive shared by every service.
///
/// `payloads` is the full payload vector including the encoded header at
/// index 0, as produced by `concord_messages::encode_message`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        recipient_mode: RecipientMode,
        recipients: &[NodeAddress],
        payloads: Vec<Vec<u8>>,
    ) -> Result<(), TransportError>;

    /// Register the listener for `topic` and start draining its queue.
    /// Each topic accepts exactly one listener.
    fn register_listener(&self, topic: Topic, listener: Arc<dyn GossipListener>);
}

/// Resolve which peers a message targets under the given mode.
pub(crate) fn resolve_recipients(
    all_peers: &[NodeAddress],
    recipient_mode: RecipientMode,
    recipients: &[NodeAddress],
) -> Vec<NodeAddress> {
    match recipient_mode {
        RecipientMode::Broadcast => all_peers.to_vec(),
        RecipientMode::List => all_peers
            .iter()
            .copied()
            .filter(|peer| recipients.contains(peer))
            .collect(),
        RecipientMode::AllButList => all_peers
            .iter()
            .copied()
            .filter(|peer| !recipients.contains(peer))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_resolution_modes() {
        let peers = [
            NodeAddress([1u8; 20]),
            NodeAddress([2u8; 20]),
            NodeAddress([3u8; 20]),
        ];
        let listed = [peers[1]];

        assert_eq!(
            resolve_recipients(&peers, RecipientMode::Broadcast, &[]),
            peers.to_vec()
        );
        assert_eq!(
            resolve_recipients(&peers, RecipientMode::List, &listed),
            vec![peers[1]]
        );
        assert_eq!(
            resolve_recipients(&peers, RecipientMode::AllButList, &listed),
            vec![peers[0], peers[2]]
        );
    }
}
