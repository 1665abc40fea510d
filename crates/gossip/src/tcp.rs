//! The production transport: framed TCP with per-peer clients.

use crate::client::PeerClient;
use crate::config::GossipConfig;
use crate::dispatcher::Dispatcher;
use crate::server::GossipServer;
use crate::{resolve_recipients, GossipListener, Transport, TransportError};
use async_trait::async_trait;
use concord_messages::{RecipientMode, Topic};
use concord_types::NodeAddress;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// TCP transport: a listener for incoming connections plus one outgoing
/// client per federation peer.
pub struct TcpTransport {
    clients: HashMap<NodeAddress, PeerClient>,
    peer_addresses: Vec<NodeAddress>,
    dispatcher: Arc<Dispatcher>,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind the listener and spawn the per-peer clients.
    pub async fn start(
        config: GossipConfig,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, TransportError> {
        let dispatcher = Arc::new(Dispatcher::new(shutdown.clone()));
        let server = GossipServer::start(
            config.listen_address,
            config.network_timeout,
            dispatcher.clone(),
            shutdown.clone(),
        )
        .await?;

        let mut clients = HashMap::new();
        let mut peer_addresses = Vec::new();
        for peer in &config.peers {
            peer_addresses.push(peer.address);
            clients.insert(
                peer.address,
                PeerClient::spawn(peer.address, peer.endpoint, &config, shutdown.clone()),
            );
        }

        Ok(Arc::new(Self {
            clients,
            peer_addresses,
            dispatcher,
            local_addr: server.local_addr,
        }))
    }

    /// The actual bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(
        &self,
        recipient_mode: RecipientMode,
        recipients: &[NodeAddress],
        payloads: Vec<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let targets = resolve_recipients(&self.peer_addresses, recipient_mode, recipients);
        for target in targets {
            if let Some(client) = self.clients.get(&target) {
                // Best effort per peer; a full queue is that peer's problem,
                // not the whole broadcast's.
                client.enqueue(payloads.clone());
            }
        }
        Ok(())
    }

    fn register_listener(&self, topic: Topic, listener: Arc<dyn GossipListener>) {
        self.dispatcher.register_listener(topic, listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerEndpoint;
    use async_trait::async_trait;
    use concord_messages::{encode_message, GossipHeader};
    use concord_types::VirtualChainId;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Collector {
        messages: Mutex<Vec<(GossipHeader, Vec<Vec<u8>>)>>,
        notify: tokio::sync::Notify,
    }

    #[async_trait]
    impl GossipListener for Collector {
        async fn on_message(&self, header: GossipHeader, payloads: Vec<Vec<u8>>) {
            self.messages.lock().push((header, payloads));
            self.notify.notify_one();
        }
    }

    fn test_config(listen: &str) -> GossipConfig {
        GossipConfig {
            listen_address: listen.parse().unwrap(),
            peers: Vec::new(),
            network_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_millis(200),
            reconnect_interval: Duration::from_millis(50),
            send_queue_capacity: 16,
        }
    }

    #[tokio::test]
    async fn delivers_between_two_transports_over_loopback() {
        let shutdown = CancellationToken::new();

        // Receiver first, so the sender can point at its real port.
        let receiver = TcpTransport::start(test_config("127.0.0.1:0"), shutdown.clone())
            .await
            .unwrap();
        let receiver_address = NodeAddress([9u8; 20]);

        let mut sender_config = test_config("127.0.0.1:0");
        sender_config.peers = vec![PeerEndpoint {
            address: receiver_address,
            endpoint: receiver.local_addr(),
        }];
        let sender = TcpTransport::start(sender_config, shutdown.clone())
            .await
            .unwrap();

        let collector = Arc::new(Collector {
            messages: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        });
        receiver.register_listener(Topic::TransactionRelay, collector.clone());

        let header = GossipHeader::broadcast(Topic::TransactionRelay, 1, VirtualChainId(42));
        let payloads = encode_message(&header, vec![b"hello".to_vec()]);
        sender
            .send(RecipientMode::Broadcast, &[], payloads)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), collector.notify.notified())
            .await
            .expect("message delivered");

        let messages = collector.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, header);
        assert_eq!(messages[0].1, vec![b"hello".to_vec()]);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn keepalives_are_not_dispatched() {
        let shutdown = CancellationToken::new();
        let receiver = TcpTransport::start(test_config("127.0.0.1:0"), shutdown.clone())
            .await
            .unwrap();
        let receiver_address = NodeAddress([7u8; 20]);

        let mut sender_config = test_config("127.0.0.1:0");
        sender_config.keepalive_interval = Duration::from_millis(20);
        sender_config.peers = vec![PeerEndpoint {
            address: receiver_address,
            endpoint: receiver.local_addr(),
        }];
        let _sender = TcpTransport::start(sender_config, shutdown.clone())
            .await
            .unwrap();

        let collector = Arc::new(Collector {
            messages: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        });
        receiver.register_listener(Topic::TransactionRelay, collector.clone());

        // Give the idle connection time to emit several keepalives.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(collector.messages.lock().is_empty());

        shutdown.cancel();
    }
}
