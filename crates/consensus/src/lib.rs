//! Benchmark consensus.
//!
//! A leader-driven threshold protocol over a constant leader. At height
//! `h = last_committed + 1` the leader proposes a block pair through the
//! consensus context, broadcasts a `Commit` message, and collects
//! `Committed` confirmations from distinct federation members. Quorum
//! (`floor(2N/3) + 1`) closes the block: the leader assembles the block
//! proof from the confirmation signatures, commits through block storage,
//! re-broadcasts the proven pair so validators can commit too, and
//! advances. There is no view change; liveness comes from per-round retry
//! rebroadcasts.
//!
//! Validator confirmations sign the pair's block-ref digest directly. The
//! same signature therefore serves as the member's block-proof entry, and
//! because the block-ref binds the height, a confirmation can never be
//! replayed for another height.

mod leader;
pub mod metrics;
mod service;
mod validator;

pub use service::BenchmarkConsensus;

use std::time::Duration;

/// Configuration view for benchmark consensus.
#[derive(Debug, Clone)]
pub struct BenchmarkConsensusConfig {
    /// Rebroadcast the current round's Commit message when no quorum
    /// arrives within this interval.
    pub round_retry_interval: Duration,
    /// Backoff after a failed proposal before asking the context again.
    pub proposal_retry_backoff: Duration,
}

impl Default for BenchmarkConsensusConfig {
    fn default() -> Self {
        Self {
            round_retry_interval: Duration::from_millis(2_000),
            proposal_retry_backoff: Duration::from_millis(250),
        }
    }
}
