//! Block pairs: transactions block, results block, and the block proof.
//!
//! A block pair is created by the leader's consensus context, referenced by
//! the consensus algorithm during the vote phase, and moved into block
//! persistence on commit. After persistence it is immutable.

use crate::hash::Sha256;
use crate::identifiers::{BlockHeight, NodeAddress, ProtocolVersion, TimestampNano, VirtualChainId};
use crate::state::ContractStateDiff;
use crate::transaction::{SignedTransaction, TransactionReceipt};
use crate::crypto::Signature;
use sbor::prelude::BasicSbor;

/// Header of the ordering half of a block pair.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TransactionsBlockHeader {
    pub protocol_version: ProtocolVersion,
    pub virtual_chain_id: VirtualChainId,
    pub block_height: BlockHeight,
    pub prev_block_hash_ptr: Sha256,
    pub timestamp: TimestampNano,
    pub num_signed_transactions: u32,
    pub metadata: Vec<u8>,
}

/// The ordering half: which transactions run, in which order.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TransactionsBlock {
    pub header: TransactionsBlockHeader,
    pub signed_transactions: Vec<SignedTransaction>,
}

impl TransactionsBlock {
    pub fn hash(&self) -> Sha256 {
        Sha256::of_encodable(self)
    }
}

/// Header of the execution half of a block pair.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ResultsBlockHeader {
    pub protocol_version: ProtocolVersion,
    pub virtual_chain_id: VirtualChainId,
    pub block_height: BlockHeight,
    pub prev_block_hash_ptr: Sha256,
    pub timestamp: TimestampNano,
    pub transactions_block_hash_ptr: Sha256,
    pub pre_execution_state_merkle_root: Sha256,
    pub receipts_merkle_root: Sha256,
    pub state_diff_hash: Sha256,
    pub num_transaction_receipts: u32,
    pub num_contract_state_diffs: u32,
}

/// The execution half: receipts and state writes produced by the ordered set.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ResultsBlock {
    pub header: ResultsBlockHeader,
    pub transaction_receipts: Vec<TransactionReceipt>,
    pub contract_state_diffs: Vec<ContractStateDiff>,
}

impl ResultsBlock {
    pub fn hash(&self) -> Sha256 {
        Sha256::of_encodable(self)
    }
}

/// One confirming federation member's signature over the block-ref digest.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ProofSignature {
    pub signer: NodeAddress,
    pub signature: Signature,
}

/// Multi-signature over the block-ref aggregating a quorum of confirmations.
///
/// An empty proof marks a proposal that has not been through the vote phase.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct BlockProof {
    pub block_ref: Sha256,
    pub signatures: Vec<ProofSignature>,
}

impl BlockProof {
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

/// The unit of replication: both block halves plus the proof binding them.
///
/// Invariant: both headers agree on protocol version, virtual chain id,
/// height, and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BlockPair {
    pub transactions_block: TransactionsBlock,
    pub results_block: ResultsBlock,
    pub proof: BlockProof,
}

impl BlockPair {
    pub fn height(&self) -> BlockHeight {
        self.transactions_block.header.block_height
    }

    pub fn timestamp(&self) -> TimestampNano {
        self.transactions_block.header.timestamp
    }

    /// The canonical digest federation members sign to confirm this pair.
    pub fn block_ref(&self) -> Sha256 {
        block_ref_digest(
            self.height(),
            self.transactions_block.hash(),
            self.results_block.hash(),
        )
    }

    /// Whether both headers agree on the fields they must share.
    pub fn headers_are_consistent(&self) -> bool {
        let tx = &self.transactions_block.header;
        let rx = &self.results_block.header;
        tx.protocol_version == rx.protocol_version
            && tx.virtual_chain_id == rx.virtual_chain_id
            && tx.block_height == rx.block_height
            && tx.timestamp == rx.timestamp
    }
}

#[derive(BasicSbor)]
struct BlockRef {
    block_height: BlockHeight,
    transactions_block_hash: Sha256,
    results_block_hash: Sha256,
}

/// Canonical 32-byte digest identifying a block pair at a given height.
///
/// The height is part of the signed payload, so a proof signature can never
/// be replayed for the same content at another height.
pub fn block_ref_digest(
    block_height: BlockHeight,
    transactions_block_hash: Sha256,
    results_block_hash: Sha256,
) -> Sha256 {
    Sha256::of_encodable(&BlockRef {
        block_height,
        transactions_block_hash,
        results_block_hash,
    })
}
