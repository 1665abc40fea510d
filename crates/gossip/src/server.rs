//! Incoming side of the TCP transport.
//!
//! The listener task accepts connections; each connection runs a dedicated
//! reader task walking `Accepted → Reading* → Closed`. Any failure (read
//! timeout, oversized frame, peer close) transitions the connection to
//! Closed and increments a transport-error counter; the listener keeps
//! accepting new connections.

use crate::dispatcher::Dispatcher;
use crate::frame::{self, FrameError, ACK};
use crate::metrics;
use crate::TransportError;
use concord_messages::decode_header;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct GossipServer {
    pub local_addr: SocketAddr,
}

impl GossipServer {
    /// Bind and start accepting. Returns once the socket is listening.
    pub(crate) async fn start(
        listen_address: SocketAddr,
        network_timeout: Duration,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(listen_address).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "gossip transport listening");

        tokio::spawn(accept_loop(listener, network_timeout, dispatcher, shutdown));
        Ok(Self { local_addr })
    }
}

async fn accept_loop(
    listener: TcpListener,
    network_timeout: Duration,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("gossip server shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "incoming gossip connection");
                        let dispatcher = dispatcher.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            metrics::get().active_incoming_connections.inc();
                            handle_connection(stream, peer_addr, network_timeout, dispatcher, shutdown)
                                .await;
                            metrics::get().active_incoming_connections.dec();
                        });
                    }
                    Err(e) => {
                        metrics::get().transport_errors.with_label_values(&["accept"]).inc();
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

/// Read frames until the peer closes, an I/O failure occurs, or shutdown.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    network_timeout: Duration,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    loop {
        let payloads = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = frame::read_frame(&mut stream, network_timeout) => match result {
                Ok(payloads) => payloads,
                Err(e) => {
                    metrics::get()
                        .transport_errors
                        .with_label_values(&[error_mode(&e)])
                        .inc();
                    debug!(%peer_addr, error = %e, "closing incoming connection");
                    return;
                }
            },
        };

        if let Err(e) = frame::write_all_deadline(&mut stream, &ACK, network_timeout).await {
            metrics::get()
                .transport_errors
                .with_label_values(&["ack_write"])
                .inc();
            debug!(%peer_addr, error = %e, "ack write failed, closing");
            return;
        }

        if payloads.is_empty() {
            metrics::get().keepalives_received.inc();
            continue;
        }

        match decode_header(&payloads) {
            Ok((header, body)) => {
                metrics::get().messages_received.inc();
                dispatcher.dispatch(header, body.to_vec()).await;
            }
            Err(e) => {
                metrics::get()
                    .transport_errors
                    .with_label_values(&["bad_header"])
                    .inc();
                warn!(%peer_addr, error = %e, "undecodable gossip header, message dropped");
            }
        }
    }
}

fn error_mode(e: &FrameError) -> &'static str {
    match e {
        FrameError::Timeout => "read_timeout",
        FrameError::TooManyPayloads(_) | FrameError::PayloadTooLarge(_) => "oversized_frame",
        FrameError::BadAck => "bad_ack",
        FrameError::Io(_) => "peer_closed",
    }
}
