//! Transactions-block validation: header checks plus the pool's pre-order
//! pass over the proposed ordering.

use crate::proposal::ConsensusContextService;
use crate::ContextError;
use concord_types::{BlockHeight, Sha256, TimestampNano, TransactionsBlock};

/// Everything a validator knows when judging a proposed ordering.
#[derive(Debug, Clone)]
pub struct TransactionsBlockValidationInput {
    pub block_height: BlockHeight,
    pub prev_block_hash: Sha256,
    pub prev_block_timestamp: TimestampNano,
    pub transactions_block: TransactionsBlock,
}

pub(crate) async fn validate(
    service: &ConsensusContextService,
    input: &TransactionsBlockValidationInput,
) -> Result<(), ContextError> {
    let config = service.config();
    let header = &input.transactions_block.header;

    if header.protocol_version != config.protocol_version {
        return Err(ContextError::ProtocolVersionMismatch);
    }
    if header.virtual_chain_id != config.virtual_chain_id {
        return Err(ContextError::VirtualChainMismatch);
    }
    if header.block_height != input.block_height {
        return Err(ContextError::BlockHeightMismatch {
            expected: input.block_height,
            actual: header.block_height,
        });
    }
    if header.prev_block_hash_ptr != input.prev_block_hash {
        return Err(ContextError::PrevHashMismatch);
    }
    if header.timestamp <= input.prev_block_timestamp {
        return Err(ContextError::TimestampOutOfRange);
    }
    let horizon = TimestampNano::now().saturating_add(config.timestamp_jitter_grace);
    if header.timestamp > horizon {
        return Err(ContextError::TimestampOutOfRange);
    }
    if header.num_signed_transactions as usize != input.transactions_block.signed_transactions.len()
    {
        return Err(ContextError::TransactionCountMismatch);
    }

    service
        .pool()
        .validate_transactions_for_ordering(
            &input.transactions_block.signed_transactions,
            input.block_height,
            header.timestamp,
        )
        .await?;
    Ok(())
}
