//! Signed transactions, execution receipts, and transaction statuses.

use crate::crypto::{KeyPair, PublicKey, Signature};
use crate::hash::Sha256;
use crate::identifiers::{ProtocolVersion, TimestampNano, VirtualChainId};
use sbor::prelude::BasicSbor;
use std::fmt;

/// A transaction body. `hash()` of the body is the transaction's identity
/// across the pool, the chain, and the receipts index.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Transaction {
    pub protocol_version: ProtocolVersion,
    pub virtual_chain_id: VirtualChainId,
    pub timestamp: TimestampNano,
    pub contract_name: String,
    pub method_name: String,
    pub input_arguments: Vec<Vec<u8>>,
    pub signer_public_key: PublicKey,
    /// Client-chosen salt so that otherwise-identical calls hash differently.
    pub salt: u64,
}

impl Transaction {
    pub fn hash(&self) -> Sha256 {
        Sha256::of_encodable(self)
    }
}

/// A transaction body plus the signer's signature over its hash.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

impl SignedTransaction {
    /// Sign `transaction` with `keypair`. The keypair's public key must be
    /// the body's `signer_public_key` for the result to verify.
    pub fn sign(transaction: Transaction, keypair: &KeyPair) -> Self {
        let signature = keypair.sign(&transaction.hash());
        Self {
            transaction,
            signature,
        }
    }

    pub fn hash(&self) -> Sha256 {
        self.transaction.hash()
    }

    pub fn verify_signature(&self) -> bool {
        self.transaction
            .signer_public_key
            .verify(&self.hash(), &self.signature)
    }

    /// Canonical encoded size, used for pool byte accounting.
    pub fn size_in_bytes(&self) -> usize {
        sbor::basic_encode(self)
            .expect("transaction should be encodable")
            .len()
    }
}

/// Outcome of executing a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum ExecutionResult {
    Success,
    Reverted,
    Error,
}

/// Execution record for one transaction inside a results block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TransactionReceipt {
    pub txhash: Sha256,
    pub execution_result: ExecutionResult,
    pub output_arguments: Vec<Vec<u8>>,
    pub output_events: Vec<Vec<u8>>,
}

impl TransactionReceipt {
    /// Digest used as this receipt's Merkle leaf.
    pub fn leaf(&self) -> Sha256 {
        Sha256::of_encodable(self)
    }
}

/// Status of a transaction as observed by the pool and the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum TransactionStatus {
    /// Admitted to the pending pool, not yet in a block.
    Pending,
    /// Included in a committed block.
    Committed,
    /// Unknown to both pools.
    NoRecord,
    DuplicateTransactionAlreadyPending,
    DuplicateTransactionAlreadyCommitted,
    RejectedCongestion,
    RejectedSignatureMismatch,
    RejectedUnsupportedVersion,
    RejectedVirtualChainMismatch,
    RejectedTimestampWindowExceeded,
    RejectedTimestampAheadOfNodeTime,
    RejectedSmartContractPreOrder,
    RejectedTransactionTooLarge,
}

impl TransactionStatus {
    /// Whether this status terminates the transaction's lifecycle.
    pub fn is_final(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::PROTOCOL_VERSION;

    fn sample_transaction(salt: u64) -> (Transaction, KeyPair) {
        let kp = KeyPair::from_seed([7u8; 32]);
        let tx = Transaction {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id: VirtualChainId(42),
            timestamp: TimestampNano(1_000_000),
            contract_name: "kv".into(),
            method_name: "put".into(),
            input_arguments: vec![b"k".to_vec(), b"v".to_vec()],
            signer_public_key: kp.public_key(),
            salt,
        };
        (tx, kp)
    }

    #[test]
    fn hash_depends_on_salt() {
        let (a, _) = sample_transaction(1);
        let (b, _) = sample_transaction(2);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn signed_transaction_verifies() {
        let (tx, kp) = sample_transaction(1);
        let signed = SignedTransaction::sign(tx, &kp);
        assert!(signed.verify_signature());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let (tx, kp) = sample_transaction(1);
        let mut signed = SignedTransaction::sign(tx, &kp);
        signed.transaction.salt = 99;
        assert!(!signed.verify_signature());
    }

    #[test]
    fn size_accounting_is_stable() {
        let (tx, kp) = sample_transaction(1);
        let signed = SignedTransaction::sign(tx, &kp);
        assert_eq!(signed.size_in_bytes(), signed.size_in_bytes());
        assert!(signed.size_in_bytes() > 96);
    }
}
