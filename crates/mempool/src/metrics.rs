//! Pool metrics on the default prometheus registry.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    pub pending_transactions: Gauge,
    pub pending_pool_bytes: Gauge,
    pub committed_transactions: Gauge,
    pub transactions_admitted: Counter,
    pub transactions_committed: Counter,
    pub transactions_forwarded: Counter,
    /// Rejections labelled by the user-visible status.
    pub transactions_rejected: CounterVec,
    pub transactions_expired: Counter,
    pub out_of_order_commits_ignored: Counter,
    /// Time a transaction sat in the pending queue before being picked
    /// for ordering.
    pub transaction_time_in_queue: Histogram,
}

pub fn get() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        pending_transactions: register_gauge!(
            "txpool_pending_transactions",
            "Transactions currently pending"
        )
        .expect("metric registration"),
        pending_pool_bytes: register_gauge!(
            "txpool_pending_pool_bytes",
            "Accounted byte size of the pending pool"
        )
        .expect("metric registration"),
        committed_transactions: register_gauge!(
            "txpool_committed_transactions",
            "Receipts retained in the committed pool"
        )
        .expect("metric registration"),
        transactions_admitted: register_counter!(
            "txpool_transactions_admitted_total",
            "Transactions admitted to the pending pool"
        )
        .expect("metric registration"),
        transactions_committed: register_counter!(
            "txpool_transactions_committed_total",
            "Transactions moved from pending to committed"
        )
        .expect("metric registration"),
        transactions_forwarded: register_counter!(
            "txpool_transactions_forwarded_total",
            "Transactions forwarded to the federation"
        )
        .expect("metric registration"),
        transactions_rejected: register_counter_vec!(
            "txpool_transactions_rejected_total",
            "Rejected transactions by status",
            &["status"]
        )
        .expect("metric registration"),
        transactions_expired: register_counter!(
            "txpool_transactions_expired_total",
            "Pending transactions dropped by the expiration sweep"
        )
        .expect("metric registration"),
        out_of_order_commits_ignored: register_counter!(
            "txpool_out_of_order_commits_ignored_total",
            "Commit notifications ignored for arriving out of height order"
        )
        .expect("metric registration"),
        transaction_time_in_queue: register_histogram!(
            "txpool_transaction_time_in_queue_seconds",
            "Queue time of transactions picked for ordering"
        )
        .expect("metric registration"),
    })
}
