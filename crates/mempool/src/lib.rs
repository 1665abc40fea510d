//! The transaction pool.
//!
//! Admits new transactions, deduplicates against both pools, forwards
//! admitted transactions to the federation, hands ordered batches to the
//! consensus context, records commits, and expires stale entries.
//!
//! All pool mutation goes through a single writer lock; reads take the
//! reader side. The pending map and its FIFO queue are updated together
//! under the write lock and are always in lockstep.

mod committed;
pub mod metrics;
mod pending;
mod service;
mod validation;

pub use committed::{CommittedPool, CommittedTransaction};
pub use pending::PendingPool;
pub use service::{TransactionPoolService, TransactionResultsHandler};
pub use validation::validate_transaction_statically;

use concord_types::{BlockHeight, Sha256, TimestampNano, TransactionStatus, VirtualChainId};
use std::time::Duration;
use thiserror::Error;

/// Configuration view for the pool.
#[derive(Debug, Clone)]
pub struct TransactionPoolConfig {
    pub virtual_chain_id: VirtualChainId,
    /// Byte budget for the pending pool; admission past it is congestion.
    pub pending_pool_size_in_bytes: usize,
    /// Transactions older than this are expired from pending.
    pub transaction_expiration_window: Duration,
    /// Transactions timestamped further than this into the future are rejected.
    pub future_timestamp_grace: Duration,
    /// Hard cap on a single transaction's encoded size.
    pub max_transaction_size_in_bytes: usize,
    /// Interval of the pending-pool expiration sweep.
    pub pending_pool_clear_expired_interval: Duration,
    /// Interval of the committed-pool expiration sweep.
    pub committed_pool_clear_expired_interval: Duration,
    /// How long committed receipts stay queryable.
    pub committed_pool_retention: Duration,
    /// Admissions within this window coalesce into one forward broadcast.
    pub forward_flush_interval: Duration,
    /// Flush the forward buffer early once it holds this many transactions.
    pub forward_batch_size: usize,
}

impl Default for TransactionPoolConfig {
    fn default() -> Self {
        Self {
            virtual_chain_id: VirtualChainId(42),
            pending_pool_size_in_bytes: 20 * 1024 * 1024,
            transaction_expiration_window: Duration::from_secs(30 * 60),
            future_timestamp_grace: Duration::from_secs(3 * 60),
            max_transaction_size_in_bytes: 32 * 1024,
            pending_pool_clear_expired_interval: Duration::from_secs(10),
            committed_pool_clear_expired_interval: Duration::from_secs(30),
            committed_pool_retention: Duration::from_secs(30 * 60),
            forward_flush_interval: Duration::from_millis(100),
            forward_batch_size: 100,
        }
    }
}

/// Rejection of a single transaction, carrying the user-visible status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transaction rejected: {status}")]
pub struct TransactionRejected {
    pub status: TransactionStatus,
}

impl TransactionRejected {
    pub fn new(status: TransactionStatus) -> Self {
        Self { status }
    }
}

/// What `add_new_transaction` reports back to the submitting gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionReceipt {
    pub txhash: Sha256,
    pub status: TransactionStatus,
    pub pending_count: usize,
    pub pending_bytes: usize,
}

/// A per-transaction outcome reported to result handlers: a commit, an
/// expiration, or a pre-order removal.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub txhash: Sha256,
    pub status: TransactionStatus,
    pub block_height: BlockHeight,
    pub block_timestamp: TimestampNano,
}
