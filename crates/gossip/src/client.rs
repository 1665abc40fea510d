//! Outgoing side of the TCP transport: one connection per peer.
//!
//! Each peer client owns its TCP connection and a bounded send queue; the
//! queue serializes sends to that peer. An idle connection sends keepalive
//! frames. Connect failures and I/O failures drop the connection and retry
//! after `reconnect_interval`; messages enqueued while disconnected wait in
//! the queue.

use crate::config::GossipConfig;
use crate::frame::{self, encode_frame};
use crate::metrics;
use concord_types::NodeAddress;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub(crate) struct PeerClient {
    peer: NodeAddress,
    queue: mpsc::Sender<Vec<Vec<u8>>>,
}

impl PeerClient {
    pub(crate) fn spawn(
        peer: NodeAddress,
        endpoint: SocketAddr,
        config: &GossipConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.send_queue_capacity);
        tokio::spawn(run_client(
            peer,
            endpoint,
            config.clone(),
            rx,
            shutdown,
        ));
        Self { peer, queue: tx }
    }

    /// Enqueue a message. A full queue drops the message: the peer is not
    /// draining fast enough and consensus retries will re-send.
    pub(crate) fn enqueue(&self, payloads: Vec<Vec<u8>>) -> bool {
        match self.queue.try_send(payloads) {
            Ok(()) => {
                metrics::get().messages_sent.inc();
                true
            }
            Err(_) => {
                metrics::get().send_queue_overflows.inc();
                warn!(peer = ?self.peer, "send queue full, message dropped");
                false
            }
        }
    }
}

async fn run_client(
    peer: NodeAddress,
    endpoint: SocketAddr,
    config: GossipConfig,
    mut queue: mpsc::Receiver<Vec<Vec<u8>>>,
    shutdown: CancellationToken,
) {
    loop {
        let mut stream = tokio::select! {
            _ = shutdown.cancelled() => return,
            connected = TcpStream::connect(endpoint) => match connected {
                Ok(stream) => stream,
                Err(e) => {
                    trace!(peer = ?peer, %endpoint, error = %e, "connect failed, will retry");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(config.reconnect_interval) => continue,
                    }
                }
            },
        };
        debug!(peer = ?peer, %endpoint, "outgoing gossip connection established");

        loop {
            let payloads = tokio::select! {
                _ = shutdown.cancelled() => return,
                message = queue.recv() => match message {
                    Some(payloads) => Some(payloads),
                    None => return,
                },
                _ = tokio::time::sleep(config.keepalive_interval) => None,
            };

            let frame_bytes = match encode_frame(payloads.as_deref().unwrap_or(&[])) {
                Ok(bytes) => bytes,
                Err(e) => {
                    metrics::get()
                        .transport_errors
                        .with_label_values(&["encode"])
                        .inc();
                    warn!(peer = ?peer, error = %e, "dropping unencodable message");
                    continue;
                }
            };

            let io = async {
                frame::write_all_deadline(&mut stream, &frame_bytes, config.network_timeout)
                    .await?;
                frame::read_ack(&mut stream, config.network_timeout).await
            };
            if let Err(e) = io.await {
                metrics::get()
                    .transport_errors
                    .with_label_values(&["send"])
                    .inc();
                debug!(peer = ?peer, error = %e, "send failed, reconnecting");
                break;
            }
        }
    }
}

impl std::fmt::Debug for PeerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerClient").field("peer", &self.peer).finish()
    }
}
