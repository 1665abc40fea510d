//! Results-block validation.
//!
//! A fixed, ordered list of named validators over one context. The first
//! failure short-circuits with a tagged error. The order matters: the
//! structural rules confirm invariants that the state and re-execution
//! rules rely on, so a reordering would report misleading kinds.

use crate::proposal::ConsensusContextService;
use crate::ContextError;
use concord_types::{merkle_root, BlockHeight, ResultsBlock, Sha256, TransactionsBlock};
use concord_vm::VirtualMachine as _;
use tracing::debug;

/// Everything a validator knows when judging a proposed results block.
#[derive(Debug, Clone)]
pub struct ResultsBlockValidationInput {
    pub block_height: BlockHeight,
    pub prev_block_hash: Sha256,
    pub transactions_block: TransactionsBlock,
    pub results_block: ResultsBlock,
}

struct RxValidationContext<'a> {
    service: &'a ConsensusContextService,
    input: &'a ResultsBlockValidationInput,
}

type RxValidator = fn(&RxValidationContext<'_>) -> Result<(), ContextError>;

/// Rules 1-9, in their mandatory order. Rule 10 (re-execution) follows as
/// an async tail in [`validate`].
const RX_VALIDATORS: &[(&str, RxValidator)] = &[
    ("protocol_version", validate_rx_protocol_version),
    ("virtual_chain", validate_rx_virtual_chain),
    ("block_height", validate_rx_block_height),
    ("tx_block_ptr", validate_rx_tx_block_ptr),
    ("tx_rx_timestamp", validate_rx_identical_timestamp),
    ("prev_block_hash_ptr", validate_rx_prev_block_hash_ptr),
    ("receipts_root", validate_rx_receipts_root),
    ("state_diff_hash", validate_rx_state_diff_hash),
    ("pre_execution_state", validate_rx_pre_execution_state_root),
];

pub(crate) async fn validate(
    service: &ConsensusContextService,
    input: &ResultsBlockValidationInput,
) -> Result<(), ContextError> {
    let ctx = RxValidationContext { service, input };
    for (name, validator) in RX_VALIDATORS {
        if let Err(e) = validator(&ctx) {
            debug!(rule = name, error = %e, "results block validation failed");
            return Err(e);
        }
    }
    validate_rx_execution(service, input).await
}

fn validate_rx_protocol_version(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    if ctx.input.results_block.header.protocol_version != ctx.service.config().protocol_version {
        return Err(ContextError::ProtocolVersionMismatch);
    }
    Ok(())
}

fn validate_rx_virtual_chain(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    if ctx.input.results_block.header.virtual_chain_id != ctx.service.config().virtual_chain_id {
        return Err(ContextError::VirtualChainMismatch);
    }
    Ok(())
}

fn validate_rx_block_height(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    let checked = ctx.input.results_block.header.block_height;
    if checked != ctx.input.block_height {
        return Err(ContextError::BlockHeightMismatch {
            expected: ctx.input.block_height,
            actual: checked,
        });
    }
    if checked != ctx.input.transactions_block.header.block_height {
        return Err(ContextError::TxRxHeightMismatch);
    }
    Ok(())
}

fn validate_rx_tx_block_ptr(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    let expected = ctx.input.transactions_block.hash();
    if ctx.input.results_block.header.transactions_block_hash_ptr != expected {
        return Err(ContextError::TxBlockPtrMismatch);
    }
    Ok(())
}

fn validate_rx_identical_timestamp(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    if ctx.input.results_block.header.timestamp != ctx.input.transactions_block.header.timestamp {
        return Err(ContextError::TxRxTimestampMismatch);
    }
    Ok(())
}

fn validate_rx_prev_block_hash_ptr(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    if ctx.input.results_block.header.prev_block_hash_ptr != ctx.input.prev_block_hash {
        return Err(ContextError::PrevHashMismatch);
    }
    Ok(())
}

fn validate_rx_receipts_root(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    let leaves: Vec<Sha256> = ctx
        .input
        .results_block
        .transaction_receipts
        .iter()
        .map(|r| r.leaf())
        .collect();
    if ctx.input.results_block.header.receipts_merkle_root != merkle_root(&leaves) {
        return Err(ContextError::MerkleMismatch("receipts"));
    }
    Ok(())
}

fn validate_rx_state_diff_hash(ctx: &RxValidationContext<'_>) -> Result<(), ContextError> {
    let leaves: Vec<Sha256> = ctx
        .input
        .results_block
        .contract_state_diffs
        .iter()
        .map(|d| d.leaf())
        .collect();
    if ctx.input.results_block.header.state_diff_hash != merkle_root(&leaves) {
        return Err(ContextError::MerkleMismatch("state diff"));
    }
    Ok(())
}

fn validate_rx_pre_execution_state_root(
    ctx: &RxValidationContext<'_>,
) -> Result<(), ContextError> {
    let prev_height = ctx
        .input
        .block_height
        .prev()
        .unwrap_or(BlockHeight::GENESIS);
    let expected = ctx.service.state().get_state_hash(prev_height)?;
    if ctx.input.results_block.header.pre_execution_state_merkle_root != expected {
        return Err(ContextError::PreExecutionStateMismatch);
    }
    Ok(())
}

/// Rule 10: re-execute the ordered set and compare both roots to the
/// header. Deterministic execution makes the comparison exact.
async fn validate_rx_execution(
    service: &ConsensusContextService,
    input: &ResultsBlockValidationInput,
) -> Result<(), ContextError> {
    let executed = service
        .vm()
        .process_transaction_set(
            input.block_height,
            input.transactions_block.header.timestamp,
            &input.transactions_block.signed_transactions,
        )
        .await?;

    let receipt_leaves: Vec<Sha256> = executed
        .transaction_receipts
        .iter()
        .map(|r| r.leaf())
        .collect();
    if input.results_block.header.receipts_merkle_root != merkle_root(&receipt_leaves) {
        return Err(ContextError::ExecutionMismatch("receipts"));
    }

    let diff_leaves: Vec<Sha256> = executed
        .contract_state_diffs
        .iter()
        .map(|d| d.leaf())
        .collect();
    if input.results_block.header.state_diff_hash != merkle_root(&diff_leaves) {
        return Err(ContextError::ExecutionMismatch("state diff"));
    }
    Ok(())
}
