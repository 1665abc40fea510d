//! Transport metrics on the default prometheus registry.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    pub messages_sent: Counter,
    pub messages_received: Counter,
    pub keepalives_received: Counter,
    /// Transport-level failures, labelled by failure mode.
    pub transport_errors: CounterVec,
    pub active_incoming_connections: Gauge,
    pub send_queue_overflows: Counter,
    /// Messages dropped because a topic queue consumer was gone.
    pub dispatch_failures: Counter,
}

/// Global transport metrics, registered once.
pub fn get() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        messages_sent: register_counter!(
            "gossip_messages_sent_total",
            "Messages enqueued toward peers"
        )
        .expect("metric registration"),
        messages_received: register_counter!(
            "gossip_messages_received_total",
            "Complete messages received and dispatched"
        )
        .expect("metric registration"),
        keepalives_received: register_counter!(
            "gossip_keepalives_received_total",
            "Keepalive frames received"
        )
        .expect("metric registration"),
        transport_errors: register_counter_vec!(
            "gossip_transport_errors_total",
            "Transport errors by failure mode",
            &["mode"]
        )
        .expect("metric registration"),
        active_incoming_connections: register_gauge!(
            "gossip_incoming_connections_active",
            "Currently open incoming connections"
        )
        .expect("metric registration"),
        send_queue_overflows: register_counter!(
            "gossip_send_queue_overflows_total",
            "Messages dropped because a peer send queue was full"
        )
        .expect("metric registration"),
        dispatch_failures: register_counter!(
            "gossip_dispatch_failures_total",
            "Messages dropped because a topic queue was closed"
        )
        .expect("metric registration"),
    })
}
