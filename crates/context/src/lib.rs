//! The consensus context: deterministic block building and checking.
//!
//! The leader asks this service for new transactions- and results-blocks;
//! validators run the same service's validation pipelines against received
//! proposals. Results-block validation is an ordered list of named
//! validators over one context; the first failure short-circuits with a
//! tagged error. Order is significant: later checks rely on invariants the
//! earlier ones confirmed.

mod proposal;
mod validate_results;
mod validate_transactions;

pub use proposal::ConsensusContextService;
pub use validate_results::ResultsBlockValidationInput;
pub use validate_transactions::TransactionsBlockValidationInput;

use concord_types::{BlockHeight, ProtocolVersion, VirtualChainId, PROTOCOL_VERSION};
use std::time::Duration;
use thiserror::Error;

/// Configuration view for the consensus context.
#[derive(Debug, Clone)]
pub struct ConsensusContextConfig {
    pub protocol_version: ProtocolVersion,
    pub virtual_chain_id: VirtualChainId,
    /// Caps on a proposal's transaction count and encoded size.
    pub max_transactions_in_block: usize,
    pub max_block_size_in_bytes: usize,
    /// A proposal waits up to `below_minimal_block_delay` to gather at
    /// least this many transactions before closing the block anyway.
    pub min_transactions_in_block: usize,
    pub below_minimal_block_delay: Duration,
    /// Allowed clock skew when judging a proposal's timestamp.
    pub timestamp_jitter_grace: Duration,
}

impl Default for ConsensusContextConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id: VirtualChainId(42),
            max_transactions_in_block: 1_000,
            max_block_size_in_bytes: 4 * 1024 * 1024,
            min_transactions_in_block: 1,
            below_minimal_block_delay: Duration::from_millis(300),
            timestamp_jitter_grace: Duration::from_secs(60),
        }
    }
}

/// Tagged failures from proposal building and validation. The variant
/// names the first pipeline rule that failed.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("protocol version mismatch")]
    ProtocolVersionMismatch,
    #[error("virtual chain mismatch")]
    VirtualChainMismatch,
    #[error("block height mismatch: expected {expected}, got {actual}")]
    BlockHeightMismatch {
        expected: BlockHeight,
        actual: BlockHeight,
    },
    #[error("transactions and results blocks disagree on height")]
    TxRxHeightMismatch,
    #[error("results block does not point at the proposed transactions block")]
    TxBlockPtrMismatch,
    #[error("transactions and results blocks disagree on timestamp")]
    TxRxTimestampMismatch,
    #[error("previous block hash pointer mismatch")]
    PrevHashMismatch,
    #[error("block timestamp out of the accepted range")]
    TimestampOutOfRange,
    #[error("transaction count in header does not match the block body")]
    TransactionCountMismatch,
    #[error("{0} merkle root in header does not match the block contents")]
    MerkleMismatch(&'static str),
    #[error("{0} merkle root in header does not match re-execution")]
    ExecutionMismatch(&'static str),
    #[error("pre-execution state root does not match the state at the previous height")]
    PreExecutionStateMismatch,
    #[error("proposed ordering failed the pool's checks: {0}")]
    PreOrderRejected(#[from] concord_mempool::TransactionRejected),
    #[error(transparent)]
    Vm(#[from] concord_vm::VmError),
    #[error(transparent)]
    State(#[from] concord_state::StateError),
}
