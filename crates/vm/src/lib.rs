//! The virtual machine seam.
//!
//! The execution engine proper is an external collaborator; consensus and
//! the transaction pool only ever see the narrow [`VirtualMachine`] trait.
//! Execution must be deterministic: the same ordered transaction set
//! against the same pre-execution state produces byte-identical receipts
//! and state diffs on every node.
//!
//! [`NativeVm`] is the in-process processor backing that trait: a minimal
//! deterministic key/value contract engine, sufficient to drive the chain
//! and its tests.

mod native;

pub use native::NativeVm;

use async_trait::async_trait;
use concord_types::{
    BlockHeight, ContractStateDiff, SignedTransaction, TimestampNano, TransactionReceipt,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("state access failed: {0}")]
    State(#[from] concord_state::StateError),
    #[error("query failed: {0}")]
    Query(String),
}

/// Outcome of running one transaction set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSetResult {
    pub transaction_receipts: Vec<TransactionReceipt>,
    pub contract_state_diffs: Vec<ContractStateDiff>,
}

/// Verdict of the lightweight pre-order check for a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreOrderVerdict {
    Valid,
    Rejected,
}

/// Result of a read-only query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub success: bool,
    pub output_arguments: Vec<Vec<u8>>,
}

/// Deterministic transaction execution, invoked by the consensus context
/// and (for pre-order checks) by the transaction pool.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    /// Execute the ordered set against the state as of `height - 1`,
    /// producing receipts and state diffs.
    async fn process_transaction_set(
        &self,
        block_height: BlockHeight,
        block_timestamp: TimestampNano,
        transactions: &[SignedTransaction],
    ) -> Result<TransactionSetResult, VmError>;

    /// Predict, without executing, whether each transaction would still be
    /// admitted at the next block. One call covers the whole batch.
    async fn pre_order_check(
        &self,
        transactions: &[SignedTransaction],
        block_height: BlockHeight,
        block_timestamp: TimestampNano,
    ) -> Result<Vec<PreOrderVerdict>, VmError>;

    /// Run a read-only query against the latest committed state.
    async fn run_query(&self, query: &SignedTransaction) -> Result<QueryResult, VmError>;
}
