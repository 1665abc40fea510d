//! In-process transport hub for multi-node tests.
//!
//! Mirrors the TCP transport's dispatch semantics (per-topic bounded
//! queues, serial consumers) without sockets. Grounded in the same
//! contract, so scenario tests exercise the same ordering behavior the
//! production transport provides.

use crate::dispatcher::Dispatcher;
use crate::{resolve_recipients, GossipListener, Transport, TransportError};
use async_trait::async_trait;
use concord_messages::{decode_header, GossipHeader, RecipientMode, Topic};
use concord_types::NodeAddress;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

type Inbox = mpsc::UnboundedSender<(GossipHeader, Vec<Vec<u8>>)>;

/// Hub connecting every in-memory node transport.
///
/// Each node gets a pump task between the hub and its dispatcher, the
/// in-memory analog of a per-connection reader: a slow (or not yet
/// started) node backs up its own inbox without stalling senders, and
/// per-node FIFO order is preserved.
pub struct InMemoryNetwork {
    nodes: RwLock<HashMap<NodeAddress, Inbox>>,
    shutdown: CancellationToken,
}

impl InMemoryNetwork {
    pub fn new(shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            shutdown,
        })
    }

    /// Add a node to the hub, returning its transport handle.
    pub fn join(self: &Arc<Self>, address: NodeAddress) -> Arc<InMemoryTransport> {
        let dispatcher = Arc::new(Dispatcher::new(self.shutdown.clone()));
        let (inbox_tx, mut inbox_rx) =
            mpsc::unbounded_channel::<(GossipHeader, Vec<Vec<u8>>)>();
        let pump_dispatcher = dispatcher.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    message = inbox_rx.recv() => {
                        let Some((header, payloads)) = message else { return };
                        pump_dispatcher.dispatch(header, payloads).await;
                    }
                }
            }
        });
        self.nodes.write().insert(address, inbox_tx);
        Arc::new(InMemoryTransport {
            address,
            network: self.clone(),
            dispatcher,
        })
    }

    fn peers_of(&self, address: NodeAddress) -> Vec<NodeAddress> {
        self.nodes
            .read()
            .keys()
            .copied()
            .filter(|a| *a != address)
            .collect()
    }

    fn inbox_of(&self, address: NodeAddress) -> Option<Inbox> {
        self.nodes.read().get(&address).cloned()
    }
}

/// One node's view of the in-memory hub.
pub struct InMemoryTransport {
    address: NodeAddress,
    network: Arc<InMemoryNetwork>,
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(
        &self,
        recipient_mode: RecipientMode,
        recipients: &[NodeAddress],
        payloads: Vec<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let (header, body) = match decode_header(&payloads) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "in-memory send with undecodable header");
                return Ok(());
            }
        };
        let peers = self.network.peers_of(self.address);
        for target in resolve_recipients(&peers, recipient_mode, recipients) {
            if let Some(inbox) = self.network.inbox_of(target) {
                let _ = inbox.send((header.clone(), body.to_vec()));
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
    use concord_messages::{encode_message, GossipHeader};
    use concord_types::VirtualChainId;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Counter {
        count: Mutex<usize>,
        notify: tokio::sync::Notify,
    }

    #[async_trait]
    impl GossipListener for Counter {
        async fn on_message(&self, _header: GossipHeader, _payloads: Vec<Vec<u8>>) {
            *self.count.lock() += 1;
            self.notify.notify_one();
        }
    }

    fn addr(i: u8) -> NodeAddress {
        NodeAddress([i; 20])
    }

    #[tokio::test]
    async fn broadcast_reaches_all_but_sender() {
        let network = InMemoryNetwork::new(CancellationToken::new());
        let a = network.join(addr(1));
        let b = network.join(addr(2));
        let c = network.join(addr(3));

        let counter_b = Arc::new(Counter {
            count: Mutex::new(0),
            notify: tokio::sync::Notify::new(),
        });
        let counter_c = Arc::new(Counter {
            count: Mutex::new(0),
            notify: tokio::sync::Notify::new(),
        });
        b.register_listener(Topic::BenchmarkConsensus, counter_b.clone());
        c.register_listener(Topic::BenchmarkConsensus, counter_c.clone());

        let header = GossipHeader::broadcast(Topic::BenchmarkConsensus, 1, VirtualChainId(42));
        a.send(
            RecipientMode::Broadcast,
            &[],
            encode_message(&header, vec![]),
        )
        .await
        .unwrap();

        for counter in [&counter_b, &counter_c] {
            tokio::time::timeout(Duration::from_secs(1), counter.notify.notified())
                .await
                .expect("delivered");
            assert_eq!(*counter.count.lock(), 1);
        }
    }

    #[tokio::test]
    async fn list_mode_targets_only_listed_peers() {
        let network = InMemoryNetwork::new(CancellationToken::new());
        let a = network.join(addr(1));
        let b = network.join(addr(2));
        let c = network.join(addr(3));

        let counter_b = Arc::new(Counter {
            count: Mutex::new(0),
            notify: tokio::sync::Notify::new(),
        });
        let counter_c = Arc::new(Counter {
            count: Mutex::new(0),
            notify: tokio::sync::Notify::new(),
        });
        b.register_listener(Topic::BlockSync, counter_b.clone());
        c.register_listener(Topic::BlockSync, counter_c.clone());

        let header = GossipHeader::to_list(Topic::BlockSync, 1, VirtualChainId(42), vec![addr(2)]);
        a.send(
            RecipientMode::List,
            &[addr(2)],
            encode_message(&header, vec![]),
        )
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), counter_b.notify.notified())
            .await
            .expect("delivered to b");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*counter_b.count.lock(), 1);
        assert_eq!(*counter_c.count.lock(), 0);
    }
}
