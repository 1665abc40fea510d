//! Block storage: the durable ordered log, the commit pipeline, and the
//! inter-node sync state machine.
//!
//! This crate is the node's source of truth for chain height. Every
//! commit, whether it originates from live consensus or from sync
//! catch-up, funnels through [`BlockStorageService::commit_block`], which enforces
//! the contiguous-height invariant, prev-hash chaining, and the quorum
//! block proof before anything touches disk.

mod fs;
mod memory;
pub mod metrics;
mod persistence;
mod proofs;
mod service;
pub mod sync;

pub use fs::FilesystemBlockPersistence;
pub use memory::InMemoryBlockPersistence;
pub use persistence::{BlockPersistence, PersistenceError};
pub use proofs::ReceiptProof;
pub use service::{BlockConsensusHandler, BlockStorageService};
pub use sync::BlockSync;

use concord_types::{BlockHeight, NodeAddress, ProtocolVersion, VirtualChainId, PROTOCOL_VERSION};
use std::time::Duration;
use thiserror::Error;

/// Configuration view for block storage and sync.
#[derive(Debug, Clone)]
pub struct BlockStorageConfig {
    pub protocol_version: ProtocolVersion,
    pub virtual_chain_id: VirtualChainId,
    /// How long receipts stay queryable through the receipts index.
    pub tx_receipt_expiration_window: Duration,
    /// A committed block's timestamp may lead local time by at most this.
    pub future_block_timestamp_grace: Duration,
    /// Cap on block pairs served in one sync chunk.
    pub sync_batch_size: usize,
    /// Quiet period without commits before the node suspects it is behind.
    pub sync_no_commit_interval: Duration,
    /// How long the petitioner collects availability responses.
    pub sync_collect_responses_timeout: Duration,
    /// How long the petitioner waits for a requested chunk.
    pub sync_collect_chunks_timeout: Duration,
}

impl Default for BlockStorageConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id: VirtualChainId(42),
            tx_receipt_expiration_window: Duration::from_secs(30 * 60),
            future_block_timestamp_grace: Duration::from_secs(3 * 60),
            sync_batch_size: 10_000,
            sync_no_commit_interval: Duration::from_secs(8),
            sync_collect_responses_timeout: Duration::from_secs(3),
            sync_collect_chunks_timeout: Duration::from_secs(15),
        }
    }
}

/// Errors from the commit pipeline and queries.
#[derive(Debug, Error)]
pub enum BlockStorageError {
    #[error("protocol version mismatch: expected {expected}, block has {actual}")]
    ProtocolVersionMismatch {
        expected: ProtocolVersion,
        actual: ProtocolVersion,
    },
    #[error("virtual chain mismatch: expected {expected}, block has {actual}")]
    VirtualChainMismatch {
        expected: VirtualChainId,
        actual: VirtualChainId,
    },
    #[error("block pair headers disagree on shared fields")]
    InconsistentHeaders,
    #[error("block height mismatch: expected {expected}, block has {actual}")]
    BlockHeightMismatch {
        expected: BlockHeight,
        actual: BlockHeight,
    },
    #[error("previous block hash pointer mismatch at height {0}")]
    PrevHashMismatch(BlockHeight),
    #[error("block timestamp out of range at height {0}")]
    TimestampOutOfRange(BlockHeight),
    #[error("fork detected at height {0}: conflicting content for a committed height")]
    ForkDetected(BlockHeight),
    #[error("block proof quorum not reached: {got} of {need} required signatures")]
    QuorumNotReached { got: usize, need: usize },
    #[error("block proof carries an invalid signature from {0}")]
    InvalidSignature(NodeAddress),
    #[error("block proof does not bind this block pair")]
    ProofRefMismatch,
    #[error("no block at height {0}")]
    NoSuchBlock(BlockHeight),
    #[error("no receipt on record for the requested transaction")]
    ReceiptNotFound,
    #[error("state store fell out of step with the block log at height {0}")]
    StateDesync(BlockHeight),
    #[error("block persistence previously failed; commits are halted")]
    PersistencePoisoned,
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
