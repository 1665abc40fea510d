//! Storage and sync metrics on the default prometheus registry.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    pub block_height: Gauge,
    pub blocks_committed: Counter,
    pub commit_latency: Histogram,
    pub idempotent_commits: Counter,
    pub forks_detected: Counter,
    /// Commit rejections by error kind.
    pub commit_failures: CounterVec,
    pub sync_state_transitions: CounterVec,
    pub sync_blocks_committed: Counter,
    pub sync_round_duration: Histogram,
    pub sync_chunks_served: Counter,
}

pub fn get() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        block_height: register_gauge!(
            "blockstorage_block_height",
            "Last committed block height"
        )
        .expect("metric registration"),
        blocks_committed: register_counter!(
            "blockstorage_blocks_committed_total",
            "Blocks committed to persistence"
        )
        .expect("metric registration"),
        commit_latency: register_histogram!(
            "blockstorage_commit_latency_seconds",
            "Wall time of commit_block"
        )
        .expect("metric registration"),
        idempotent_commits: register_counter!(
            "blockstorage_idempotent_commits_total",
            "Commits of an already-stored block"
        )
        .expect("metric registration"),
        forks_detected: register_counter!(
            "blockstorage_forks_detected_total",
            "Commits rejected for conflicting with stored content"
        )
        .expect("metric registration"),
        commit_failures: register_counter_vec!(
            "blockstorage_commit_failures_total",
            "Commit rejections by error kind",
            &["kind"]
        )
        .expect("metric registration"),
        sync_state_transitions: register_counter_vec!(
            "blocksync_state_transitions_total",
            "Sync state machine transitions by target state",
            &["state"]
        )
        .expect("metric registration"),
        sync_blocks_committed: register_counter!(
            "blocksync_blocks_committed_total",
            "Blocks committed through sync catch-up"
        )
        .expect("metric registration"),
        sync_round_duration: register_histogram!(
            "blocksync_round_duration_seconds",
            "Duration of one availability-to-processing sync round"
        )
        .expect("metric registration"),
        sync_chunks_served: register_counter!(
            "blocksync_chunks_served_total",
            "Chunk responses served to petitioners"
        )
        .expect("metric registration"),
    })
}
