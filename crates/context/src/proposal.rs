//! Proposal assembly: new transactions- and results-blocks for the leader.

use crate::validate_results::{self, ResultsBlockValidationInput};
use crate::validate_transactions::{self, TransactionsBlockValidationInput};
use crate::{ConsensusContextConfig, ContextError};
use concord_mempool::TransactionPoolService;
use concord_state::StateStorage;
use concord_types::{
    merkle_root, BlockHeight, ResultsBlock, ResultsBlockHeader, Sha256, SignedTransaction,
    TimestampNano, TransactionsBlock, TransactionsBlockHeader,
};
use concord_vm::VirtualMachine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Builds and checks blocks deterministically against the pool, the VM,
/// and the state store.
pub struct ConsensusContextService {
    config: ConsensusContextConfig,
    pool: Arc<TransactionPoolService>,
    vm: Arc<dyn VirtualMachine>,
    state: Arc<StateStorage>,
}

impl ConsensusContextService {
    pub fn new(
        config: ConsensusContextConfig,
        pool: Arc<TransactionPoolService>,
        vm: Arc<dyn VirtualMachine>,
        state: Arc<StateStorage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            pool,
            vm,
            state,
        })
    }

    pub(crate) fn config(&self) -> &ConsensusContextConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &Arc<TransactionPoolService> {
        &self.pool
    }

    pub(crate) fn vm(&self) -> &Arc<dyn VirtualMachine> {
        &self.vm
    }

    pub(crate) fn state(&self) -> &Arc<StateStorage> {
        &self.state
    }

    /// Pull a candidate batch and close a transactions block at `height`.
    ///
    /// The proposal timestamp is `max(now, prev_timestamp + 1ns)`, which
    /// keeps block timestamps strictly increasing even against a clock
    /// that stalled. When the pool holds fewer than
    /// `min_transactions_in_block` candidates, the call waits up to
    /// `below_minimal_block_delay` for more before closing the block with
    /// whatever arrived.
    pub async fn request_new_transactions_block(
        &self,
        block_height: BlockHeight,
        prev_block_hash: Sha256,
        prev_block_timestamp: TimestampNano,
    ) -> Result<TransactionsBlock, ContextError> {
        let deadline = Instant::now() + self.config.below_minimal_block_delay;
        let transactions = loop {
            let timestamp = proposal_timestamp(prev_block_timestamp);
            let batch = self
                .pool
                .get_transactions_for_ordering(
                    self.config.max_transactions_in_block,
                    self.config.max_block_size_in_bytes,
                    block_height,
                    timestamp,
                )
                .await;
            if batch.len() >= self.config.min_transactions_in_block
                || Instant::now() >= deadline
            {
                break batch;
            }
            debug!(
                have = batch.len(),
                want = self.config.min_transactions_in_block,
                "proposal below minimal size, waiting for more transactions"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        let timestamp = proposal_timestamp(prev_block_timestamp);
        let transactions: Vec<SignedTransaction> =
            transactions.iter().map(|tx| (**tx).clone()).collect();
        Ok(TransactionsBlock {
            header: TransactionsBlockHeader {
                protocol_version: self.config.protocol_version,
                virtual_chain_id: self.config.virtual_chain_id,
                block_height,
                prev_block_hash_ptr: prev_block_hash,
                timestamp,
                num_signed_transactions: transactions.len() as u32,
                metadata: vec![],
            },
            signed_transactions: transactions,
        })
    }

    /// Execute the proposed ordering and close the matching results block.
    pub async fn request_new_results_block(
        &self,
        block_height: BlockHeight,
        prev_block_hash: Sha256,
        transactions_block: &TransactionsBlock,
    ) -> Result<ResultsBlock, ContextError> {
        let prev_height = block_height.prev().unwrap_or(BlockHeight::GENESIS);
        let pre_execution_state_merkle_root = self.state.get_state_hash(prev_height)?;

        let executed = self
            .vm
            .process_transaction_set(
                block_height,
                transactions_block.header.timestamp,
                &transactions_block.signed_transactions,
            )
            .await?;

        let receipt_leaves: Vec<Sha256> = executed
            .transaction_receipts
            .iter()
            .map(|r| r.leaf())
            .collect();
        let diff_leaves: Vec<Sha256> = executed
            .contract_state_diffs
            .iter()
            .map(|d| d.leaf())
            .collect();

        Ok(ResultsBlock {
            header: ResultsBlockHeader {
                protocol_version: self.config.protocol_version,
                virtual_chain_id: self.config.virtual_chain_id,
                block_height,
                prev_block_hash_ptr: prev_block_hash,
                timestamp: transactions_block.header.timestamp,
                transactions_block_hash_ptr: transactions_block.hash(),
                pre_execution_state_merkle_root,
                receipts_merkle_root: merkle_root(&receipt_leaves),
                state_diff_hash: merkle_root(&diff_leaves),
                num_transaction_receipts: executed.transaction_receipts.len() as u32,
                num_contract_state_diffs: executed.contract_state_diffs.len() as u32,
            },
            transaction_receipts: executed.transaction_receipts,
            contract_state_diffs: executed.contract_state_diffs,
        })
    }

    /// Header and pool checks over a received transactions block.
    pub async fn validate_transactions_block(
        &self,
        input: &TransactionsBlockValidationInput,
    ) -> Result<(), ContextError> {
        validate_transactions::validate(self, input).await
    }

    /// The ten-rule ordered pipeline over a received results block.
    pub async fn validate_results_block(
        &self,
        input: &ResultsBlockValidationInput,
    ) -> Result<(), ContextError> {
        validate_results::validate(self, input).await
    }
}

fn proposal_timestamp(prev_block_timestamp: TimestampNano) -> TimestampNano {
    TimestampNano(TimestampNano::now().0.max(prev_block_timestamp.0 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_timestamp_exceeds_a_future_predecessor() {
        let ahead = TimestampNano::now().saturating_add(Duration::from_secs(3600));
        assert_eq!(proposal_timestamp(ahead).0, ahead.0 + 1);
    }

    #[test]
    fn proposal_timestamp_tracks_the_clock_normally() {
        let behind = TimestampNano(1);
        let stamped = proposal_timestamp(behind);
        assert!(stamped > behind);
        assert!(stamped <= TimestampNano::now().saturating_add(Duration::from_secs(1)));
    }
}
