//! Core types for the Concord ordered block replication engine.
//!
//! This crate provides the foundational types used throughout the node:
//!
//! - **Primitives**: digests, node addresses, heights, timestamps
//! - **Crypto**: ed25519 keypairs and signatures over 32-byte digests
//! - **Merkle**: ordered Merkle trees with inclusion proofs
//! - **Chain types**: transactions, receipts, state diffs, block pairs
//! - **Federation**: the fixed validator set and leader designation
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crate, making it the foundation layer. Every structure that is hashed,
//! signed, gossiped, or persisted derives `BasicSbor` so that its canonical
//! byte encoding is defined in exactly one place.

mod block;
mod crypto;
mod hash;
mod identifiers;
mod merkle;
mod state;
mod topology;
mod transaction;

pub use block::{
    block_ref_digest, BlockPair, BlockProof, ProofSignature, ResultsBlock, ResultsBlockHeader,
    TransactionsBlock, TransactionsBlockHeader,
};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::Sha256;
pub use identifiers::{
    BlockHeight, NodeAddress, ProtocolVersion, TimestampNano, VirtualChainId, PROTOCOL_VERSION,
};
pub use merkle::{merkle_inclusion_proof, merkle_root, MerkleProof, MerkleSide, MerkleStep};
pub use state::{ContractStateDiff, StateRecord};
pub use topology::{FederationMember, FederationTopology, TopologyError};
pub use transaction::{
    ExecutionResult, SignedTransaction, Transaction, TransactionReceipt, TransactionStatus,
};

/// Test utilities shared by the workspace test suites.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic keypair from a seed byte, for reproducible federations.
    pub fn keypair_from_seed(seed: u8) -> KeyPair {
        KeyPair::from_seed([seed; 32])
    }

    /// Build a federation of `n` members with member 0 as the leader.
    ///
    /// Returns the topology together with the members' keypairs, in the
    /// same order as the topology's member list.
    pub fn test_federation(n: usize) -> (FederationTopology, Vec<KeyPair>) {
        let keypairs: Vec<KeyPair> = (0..n).map(|i| keypair_from_seed(i as u8 + 1)).collect();
        let members = keypairs
            .iter()
            .map(|kp| FederationMember {
                address: kp.address(),
                public_key: kp.public_key(),
            })
            .collect::<Vec<_>>();
        let leader = members[0].address;
        let topology = FederationTopology::new(members, leader).expect("valid test federation");
        (topology, keypairs)
    }

    /// Build a header-consistent block pair on top of `prev`, carrying the
    /// given transactions and empty results. The proof is signed by the
    /// first `quorum()` keypairs.
    pub fn proven_block_pair(
        topology: &FederationTopology,
        keypairs: &[KeyPair],
        prev: Option<&BlockPair>,
        virtual_chain_id: VirtualChainId,
        transactions: Vec<SignedTransaction>,
    ) -> BlockPair {
        let height = prev.map(|p| p.height().next()).unwrap_or(BlockHeight(1));
        let timestamp = prev
            .map(|p| TimestampNano(p.timestamp().0 + 1_000_000))
            .unwrap_or_else(TimestampNano::now);
        let prev_tx_hash = prev
            .map(|p| p.transactions_block.hash())
            .unwrap_or(Sha256::ZERO);
        let prev_rx_hash = prev
            .map(|p| p.results_block.hash())
            .unwrap_or(Sha256::ZERO);

        let transactions_block = TransactionsBlock {
            header: TransactionsBlockHeader {
                protocol_version: PROTOCOL_VERSION,
                virtual_chain_id,
                block_height: height,
                prev_block_hash_ptr: prev_tx_hash,
                timestamp,
                num_signed_transactions: transactions.len() as u32,
                metadata: vec![],
            },
            signed_transactions: transactions,
        };
        let results_block = ResultsBlock {
            header: ResultsBlockHeader {
                protocol_version: PROTOCOL_VERSION,
                virtual_chain_id,
                block_height: height,
                prev_block_hash_ptr: prev_rx_hash,
                timestamp,
                transactions_block_hash_ptr: transactions_block.hash(),
                pre_execution_state_merkle_root: Sha256::ZERO,
                receipts_merkle_root: Sha256::ZERO,
                state_diff_hash: Sha256::ZERO,
                num_transaction_receipts: 0,
                num_contract_state_diffs: 0,
            },
            transaction_receipts: vec![],
            contract_state_diffs: vec![],
        };
        let mut pair = BlockPair {
            transactions_block,
            results_block,
            proof: BlockProof::default(),
        };
        let block_ref = pair.block_ref();
        pair.proof = BlockProof {
            block_ref,
            signatures: keypairs
                .iter()
                .take(topology.quorum())
                .map(|kp| ProofSignature {
                    signer: kp.address(),
                    signature: kp.sign(&block_ref),
                })
                .collect(),
        };
        pair
    }

    /// A signed transaction against the `kv` contract with the given timestamp.
    pub fn signed_transaction_at(
        signer: &KeyPair,
        virtual_chain_id: VirtualChainId,
        timestamp: TimestampNano,
        salt: u64,
    ) -> SignedTransaction {
        let transaction = Transaction {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id,
            timestamp,
            contract_name: "kv".to_string(),
            method_name: "put".to_string(),
            input_arguments: vec![salt.to_be_bytes().to_vec(), b"value".to_vec()],
            signer_public_key: signer.public_key(),
            salt,
        };
        SignedTransaction::sign(transaction, signer)
    }
}
