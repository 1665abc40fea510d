//! Consensus metrics on the default prometheus registry.

use prometheus::{register_counter, register_gauge, Counter, Gauge};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    pub rounds_started: Counter,
    pub round_retries: Counter,
    pub proposal_failures: Counter,
    pub confirmations_received: Counter,
    pub invalid_messages: Counter,
    pub blocks_closed: Counter,
    pub validator_replies: Counter,
    pub current_round_height: Gauge,
}

pub fn get() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        rounds_started: register_counter!(
            "consensus_rounds_started_total",
            "Leader rounds started"
        )
        .expect("metric registration"),
        round_retries: register_counter!(
            "consensus_round_retries_total",
            "Commit rebroadcasts after the retry timer fired"
        )
        .expect("metric registration"),
        proposal_failures: register_counter!(
            "consensus_proposal_failures_total",
            "Proposals the consensus context failed to produce"
        )
        .expect("metric registration"),
        confirmations_received: register_counter!(
            "consensus_confirmations_received_total",
            "Valid Committed confirmations accepted"
        )
        .expect("metric registration"),
        invalid_messages: register_counter!(
            "consensus_invalid_messages_total",
            "Consensus messages dropped for bad signatures or senders"
        )
        .expect("metric registration"),
        blocks_closed: register_counter!(
            "consensus_blocks_closed_total",
            "Blocks closed with a quorum proof"
        )
        .expect("metric registration"),
        validator_replies: register_counter!(
            "consensus_validator_replies_total",
            "Committed replies sent by the validator side"
        )
        .expect("metric registration"),
        current_round_height: register_gauge!(
            "consensus_current_round_height",
            "Height the leader is currently driving"
        )
        .expect("metric registration"),
    })
}
