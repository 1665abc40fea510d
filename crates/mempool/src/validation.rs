//! Static admission checks, shared by local submission and forwarded
//! transactions.

use crate::{TransactionPoolConfig, TransactionRejected};
use concord_types::{SignedTransaction, TimestampNano, TransactionStatus, PROTOCOL_VERSION};

/// Validate everything that can be checked without consulting the VM or
/// either pool: signature, protocol version, chain id, timestamp window,
/// and encoded size.
pub fn validate_transaction_statically(
    config: &TransactionPoolConfig,
    transaction: &SignedTransaction,
    now: TimestampNano,
) -> Result<(), TransactionRejected> {
    let body = &transaction.transaction;
    if body.protocol_version != PROTOCOL_VERSION {
        return Err(TransactionRejected::new(
            TransactionStatus::RejectedUnsupportedVersion,
        ));
    }
    if body.virtual_chain_id != config.virtual_chain_id {
        return Err(TransactionRejected::new(
            TransactionStatus::RejectedVirtualChainMismatch,
        ));
    }
    if body.timestamp < now.saturating_sub(config.transaction_expiration_window) {
        return Err(TransactionRejected::new(
            TransactionStatus::RejectedTimestampWindowExceeded,
        ));
    }
    if body.timestamp > now.saturating_add(config.future_timestamp_grace) {
        return Err(TransactionRejected::new(
            TransactionStatus::RejectedTimestampAheadOfNodeTime,
        ));
    }
    if transaction.size_in_bytes() > config.max_transaction_size_in_bytes {
        return Err(TransactionRejected::new(
            TransactionStatus::RejectedTransactionTooLarge,
        ));
    }
    if !transaction.verify_signature() {
        return Err(TransactionRejected::new(
            TransactionStatus::RejectedSignatureMismatch,
        ));
    }
    Ok(())
}
