//! The block storage service: commit pipeline, queries, receipt proofs.

use crate::metrics;
use crate::persistence::BlockPersistence;
use crate::proofs::ReceiptProof;
use crate::{BlockStorageConfig, BlockStorageError};
use async_trait::async_trait;
use concord_mempool::TransactionPoolService;
use concord_state::StateStorage;
use concord_types::{
    merkle_inclusion_proof, BlockHeight, BlockPair, FederationTopology, Sha256, TimestampNano,
    TransactionReceipt, TransactionsBlock,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Callback interface the consensus algorithm registers at construction.
/// Block storage holds only this interface, never the concrete algorithm.
#[async_trait]
pub trait BlockConsensusHandler: Send + Sync {
    /// A block was committed (live consensus or sync catch-up).
    async fn on_block_committed(&self, pair: &BlockPair);
}

#[derive(Clone)]
struct ReceiptLocation {
    block_height: BlockHeight,
    block_timestamp: TimestampNano,
    receipt_index: usize,
}

enum CommitDisposition {
    Append,
    AlreadyCommitted,
}

/// Source of truth for chain height.
pub struct BlockStorageService {
    config: BlockStorageConfig,
    topology: Arc<FederationTopology>,
    persistence: Arc<dyn BlockPersistence>,
    pool: Arc<TransactionPoolService>,
    state: Arc<StateStorage>,
    /// Serializes the commit path; queries go straight to persistence.
    commit_lock: tokio::sync::Mutex<()>,
    /// Cache of the tip pair so prev-hash checks avoid a disk read.
    last_committed: RwLock<Option<BlockPair>>,
    receipts_index: RwLock<HashMap<Sha256, ReceiptLocation>>,
    handlers: RwLock<Vec<Arc<dyn BlockConsensusHandler>>>,
    tip_tx: watch::Sender<BlockHeight>,
    /// Set after a persistence failure. A store that failed an append can
    /// no longer guarantee the contiguity invariant, so every further
    /// commit is refused until the operator restarts the node.
    poisoned: AtomicBool,
}

impl BlockStorageService {
    /// Open the service over existing persistence, rebuilding the receipts
    /// index from the retained window.
    pub fn new(
        config: BlockStorageConfig,
        topology: Arc<FederationTopology>,
        persistence: Arc<dyn BlockPersistence>,
        pool: Arc<TransactionPoolService>,
        state: Arc<StateStorage>,
    ) -> Result<Arc<Self>, BlockStorageError> {
        let last = persistence.last_block()?;
        let tip = last.as_ref().map(|b| b.height()).unwrap_or(BlockHeight::GENESIS);
        let (tip_tx, _) = watch::channel(tip);

        let service = Arc::new(Self {
            config,
            topology,
            persistence,
            pool,
            state,
            commit_lock: tokio::sync::Mutex::new(()),
            last_committed: RwLock::new(last),
            receipts_index: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            tip_tx,
            poisoned: AtomicBool::new(false),
        });
        service.rebuild_receipts_index()?;
        service.replay_state_from_persistence()?;
        metrics::get().block_height.set(tip.0 as f64);
        info!(%tip, "block storage service opened");
        Ok(service)
    }

    pub fn register_consensus_handler(&self, handler: Arc<dyn BlockConsensusHandler>) {
        self.handlers.write().push(handler);
    }

    /// Watch channel carrying the tip height; the sync machine's
    /// no-commit timer observes it.
    pub fn tip_watch(&self) -> watch::Receiver<BlockHeight> {
        self.tip_tx.subscribe()
    }

    pub fn config(&self) -> &BlockStorageConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<FederationTopology> {
        &self.topology
    }

    /// Validate `pair` for commit against the current tip without touching
    /// disk. Exposed for the sync machine, which validates each chunked
    /// block before committing it.
    pub fn validate_block_for_commit(&self, pair: &BlockPair) -> Result<(), BlockStorageError> {
        self.classify_for_commit(pair).map(|_| ())
    }

    /// The commit sink. Enforces the contiguous-height invariant, chains
    /// prev-hashes, verifies the quorum proof, persists, indexes receipts,
    /// then fans out to the pool and the registered consensus handlers.
    ///
    /// A block already stored with identical content is idempotent
    /// success. Returns the tip height after the call.
    pub async fn commit_block(&self, pair: BlockPair) -> Result<BlockHeight, BlockStorageError> {
        let _guard = self.commit_lock.lock().await;
        if self.poisoned.load(Ordering::Acquire) {
            return Err(BlockStorageError::PersistencePoisoned);
        }
        let timer = metrics::get().commit_latency.start_timer();

        match self.classify_for_commit(&pair)? {
            CommitDisposition::AlreadyCommitted => {
                metrics::get().idempotent_commits.inc();
                timer.observe_duration();
                return Ok(self.tip_height());
            }
            CommitDisposition::Append => {}
        }

        if let Err(e) = self.persistence.append_block(&pair) {
            // Losing the ability to persist is not recoverable in place:
            // stop accepting commits and let the supervisor wind us down.
            self.poisoned.store(true, Ordering::Release);
            error!(error = %e, height = %pair.height(), "block persistence failed, commits halted");
            return Err(e.into());
        }

        let height = pair.height();
        let timestamp = pair.timestamp();
        if let Err(e) = self
            .state
            .write_at(height, &pair.results_block.contract_state_diffs)
        {
            // State lagging the block log is an invariant violation the
            // node cannot repair at runtime.
            self.poisoned.store(true, Ordering::Release);
            error!(error = %e, %height, "state write failed after block persist, commits halted");
            return Err(BlockStorageError::StateDesync(height));
        }
        self.index_receipts(&pair);
        *self.last_committed.write() = Some(pair.clone());
        self.tip_tx.send_replace(height);

        let m = metrics::get();
        m.blocks_committed.inc();
        m.block_height.set(height.0 as f64);
        timer.observe_duration();

        self.pool
            .commit_transaction_receipts(
                height,
                timestamp,
                &pair.results_block.transaction_receipts,
            )
            .await;

        let handlers: Vec<_> = self.handlers.read().iter().cloned().collect();
        for handler in handlers {
            handler.on_block_committed(&pair).await;
        }

        info!(%height, transactions = pair.transactions_block.signed_transactions.len(), "block committed");
        Ok(height)
    }

    pub fn tip_height(&self) -> BlockHeight {
        self.last_committed
            .read()
            .as_ref()
            .map(|b| b.height())
            .unwrap_or(BlockHeight::GENESIS)
    }

    /// `(height, timestamp)` of the last committed block; `(0, 0)` before
    /// the first commit.
    pub fn get_last_committed_block_info(&self) -> (BlockHeight, TimestampNano) {
        self.last_committed
            .read()
            .as_ref()
            .map(|b| (b.height(), b.timestamp()))
            .unwrap_or((BlockHeight::GENESIS, TimestampNano(0)))
    }

    pub fn last_committed_block(&self) -> Option<BlockPair> {
        self.last_committed.read().clone()
    }

    pub fn get_block_pair(
        &self,
        height: BlockHeight,
    ) -> Result<Option<BlockPair>, BlockStorageError> {
        Ok(self.persistence.block_at(height)?)
    }

    pub fn get_transactions_block(
        &self,
        height: BlockHeight,
    ) -> Result<TransactionsBlock, BlockStorageError> {
        self.persistence
            .block_at(height)?
            .map(|pair| pair.transactions_block)
            .ok_or(BlockStorageError::NoSuchBlock(height))
    }

    pub fn get_results_block(
        &self,
        height: BlockHeight,
    ) -> Result<concord_types::ResultsBlock, BlockStorageError> {
        self.persistence
            .block_at(height)?
            .map(|pair| pair.results_block)
            .ok_or(BlockStorageError::NoSuchBlock(height))
    }

    /// Serve a sync chunk from persisted history, capped at the configured
    /// batch size.
    pub fn blocks_for_sync(
        &self,
        first: BlockHeight,
        last: BlockHeight,
    ) -> Result<Vec<BlockPair>, BlockStorageError> {
        if last < first {
            return Ok(Vec::new());
        }
        let span = (last.0 - first.0 + 1) as usize;
        let max = span.min(self.config.sync_batch_size);
        Ok(self.persistence.blocks_in_range(first, max)?)
    }

    /// Look up a receipt through the time-windowed index.
    pub fn get_transaction_receipt(
        &self,
        txhash: &Sha256,
    ) -> Result<Option<(TransactionReceipt, BlockHeight, TimestampNano)>, BlockStorageError>
    {
        let location = match self.receipts_index.read().get(txhash) {
            Some(location) => location.clone(),
            None => return Ok(None),
        };
        let cutoff =
            TimestampNano::now().saturating_sub(self.config.tx_receipt_expiration_window);
        if location.block_timestamp < cutoff {
            return Ok(None);
        }
        let block = self
            .persistence
            .block_at(location.block_height)?
            .ok_or(BlockStorageError::NoSuchBlock(location.block_height))?;
        let receipt = block
            .results_block
            .transaction_receipts
            .get(location.receipt_index)
            .cloned()
            .ok_or(BlockStorageError::ReceiptNotFound)?;
        Ok(Some((receipt, location.block_height, location.block_timestamp)))
    }

    /// Merkle inclusion proof for a receipt plus the containing block's
    /// quorum proof.
    pub fn generate_receipt_proof(
        &self,
        txhash: &Sha256,
    ) -> Result<ReceiptProof, BlockStorageError> {
        let location = self
            .receipts_index
            .read()
            .get(txhash)
            .cloned()
            .ok_or(BlockStorageError::ReceiptNotFound)?;
        let block = self
            .persistence
            .block_at(location.block_height)?
            .ok_or(BlockStorageError::NoSuchBlock(location.block_height))?;

        let receipts = &block.results_block.transaction_receipts;
        let leaves: Vec<Sha256> = receipts.iter().map(|r| r.leaf()).collect();
        let merkle_proof = merkle_inclusion_proof(&leaves, location.receipt_index)
            .ok_or(BlockStorageError::ReceiptNotFound)?;
        Ok(ReceiptProof {
            block_height: location.block_height,
            receipt: receipts[location.receipt_index].clone(),
            merkle_proof,
            block_proof: block.proof.clone(),
        })
    }

    fn classify_for_commit(
        &self,
        pair: &BlockPair,
    ) -> Result<CommitDisposition, BlockStorageError> {
        let result = self.classify_inner(pair);
        if let Err(e) = &result {
            metrics::get()
                .commit_failures
                .with_label_values(&[commit_failure_kind(e)])
                .inc();
        }
        result
    }

    fn classify_inner(&self, pair: &BlockPair) -> Result<CommitDisposition, BlockStorageError> {
        if !pair.headers_are_consistent() {
            return Err(BlockStorageError::InconsistentHeaders);
        }
        let tx_header = &pair.transactions_block.header;
        if tx_header.protocol_version != self.config.protocol_version {
            return Err(BlockStorageError::ProtocolVersionMismatch {
                expected: self.config.protocol_version,
                actual: tx_header.protocol_version,
            });
        }
        if tx_header.virtual_chain_id != self.config.virtual_chain_id {
            return Err(BlockStorageError::VirtualChainMismatch {
                expected: self.config.virtual_chain_id,
                actual: tx_header.virtual_chain_id,
            });
        }

        let height = pair.height();
        let tip = self.tip_height();

        if height <= tip {
            // Re-commit of a stored height: idempotent if identical,
            // a fork otherwise.
            let stored = self
                .persistence
                .block_at(height)?
                .ok_or(BlockStorageError::NoSuchBlock(height))?;
            let same_content = stored.transactions_block.hash()
                == pair.transactions_block.hash()
                && stored.results_block.hash() == pair.results_block.hash();
            if same_content {
                return Ok(CommitDisposition::AlreadyCommitted);
            }
            if stored.timestamp() != pair.timestamp() {
                warn!(
                    %height,
                    stored_timestamp = %stored.timestamp(),
                    offered_timestamp = %pair.timestamp(),
                    "fork candidate disagrees on block timestamp"
                );
            }
            metrics::get().forks_detected.inc();
            return Err(BlockStorageError::ForkDetected(height));
        }

        if height != tip.next() {
            return Err(BlockStorageError::BlockHeightMismatch {
                expected: tip.next(),
                actual: height,
            });
        }

        let last = self.last_committed.read();
        let (expected_prev_tx, expected_prev_rx, prev_timestamp) = match last.as_ref() {
            Some(prev) => (
                prev.transactions_block.hash(),
                prev.results_block.hash(),
                prev.timestamp(),
            ),
            None => (Sha256::ZERO, Sha256::ZERO, TimestampNano(0)),
        };
        if tx_header.prev_block_hash_ptr != expected_prev_tx
            || pair.results_block.header.prev_block_hash_ptr != expected_prev_rx
        {
            return Err(BlockStorageError::PrevHashMismatch(height));
        }
        if pair.timestamp() <= prev_timestamp {
            return Err(BlockStorageError::TimestampOutOfRange(height));
        }
        let horizon =
            TimestampNano::now().saturating_add(self.config.future_block_timestamp_grace);
        if pair.timestamp() > horizon {
            return Err(BlockStorageError::TimestampOutOfRange(height));
        }

        self.verify_block_proof(pair)?;
        Ok(CommitDisposition::Append)
    }

    /// At least `floor(2N/3) + 1` distinct federation members must have
    /// signed this pair's block-ref.
    fn verify_block_proof(&self, pair: &BlockPair) -> Result<(), BlockStorageError> {
        let block_ref = pair.block_ref();
        if pair.proof.block_ref != block_ref {
            return Err(BlockStorageError::ProofRefMismatch);
        }

        let mut confirmed = Vec::new();
        for signature in &pair.proof.signatures {
            if confirmed.contains(&signature.signer) {
                continue;
            }
            let Some(key) = self.topology.public_key_of(signature.signer) else {
                return Err(BlockStorageError::InvalidSignature(signature.signer));
            };
            if !key.verify(&block_ref, &signature.signature) {
                return Err(BlockStorageError::InvalidSignature(signature.signer));
            }
            confirmed.push(signature.signer);
        }

        let need = self.topology.quorum();
        if confirmed.len() < need {
            return Err(BlockStorageError::QuorumNotReached {
                got: confirmed.len(),
                need,
            });
        }
        Ok(())
    }

    fn index_receipts(&self, pair: &BlockPair) {
        let mut index = self.receipts_index.write();
        for (receipt_index, receipt) in
            pair.results_block.transaction_receipts.iter().enumerate()
        {
            index.insert(
                receipt.txhash,
                ReceiptLocation {
                    block_height: pair.height(),
                    block_timestamp: pair.timestamp(),
                    receipt_index,
                },
            );
        }
        // Retention: drop entries whose block fell out of the query window.
        let cutoff =
            TimestampNano::now().saturating_sub(self.config.tx_receipt_expiration_window);
        index.retain(|_, location| location.block_timestamp >= cutoff);
    }

    /// Bring the (volatile) state store up to the persisted tip by
    /// replaying every stored block's diffs, oldest first.
    fn replay_state_from_persistence(&self) -> Result<(), BlockStorageError> {
        let tip = self.tip_height();
        let mut height = self.state.last_written_height().next();
        while height <= tip {
            let pair = self
                .persistence
                .block_at(height)?
                .ok_or(BlockStorageError::NoSuchBlock(height))?;
            self.state
                .write_at(height, &pair.results_block.contract_state_diffs)
                .map_err(|_| BlockStorageError::StateDesync(height))?;
            height = height.next();
        }
        Ok(())
    }

    /// Walk back from the tip reindexing receipts still inside the window.
    fn rebuild_receipts_index(&self) -> Result<(), BlockStorageError> {
        let cutoff =
            TimestampNano::now().saturating_sub(self.config.tx_receipt_expiration_window);
        let mut height = self.tip_height();
        let mut index = self.receipts_index.write();
        while !height.is_genesis() {
            let Some(pair) = self.persistence.block_at(height)? else {
                break;
            };
            if pair.timestamp() < cutoff {
                break;
            }
            for (receipt_index, receipt) in
                pair.results_block.transaction_receipts.iter().enumerate()
            {
                index.entry(receipt.txhash).or_insert(ReceiptLocation {
                    block_height: pair.height(),
                    block_timestamp: pair.timestamp(),
                    receipt_index,
                });
            }
            height = height.prev().unwrap_or(BlockHeight::GENESIS);
        }
        Ok(())
    }
}

fn commit_failure_kind(e: &BlockStorageError) -> &'static str {
    match e {
        BlockStorageError::ProtocolVersionMismatch { .. } => "protocol_version",
        BlockStorageError::VirtualChainMismatch { .. } => "virtual_chain",
        BlockStorageError::InconsistentHeaders => "inconsistent_headers",
        BlockStorageError::BlockHeightMismatch { .. } => "height_mismatch",
        BlockStorageError::PrevHashMismatch(_) => "prev_hash",
        BlockStorageError::TimestampOutOfRange(_) => "timestamp",
        BlockStorageError::ForkDetected(_) => "fork",
        BlockStorageError::QuorumNotReached { .. } => "quorum",
        BlockStorageError::InvalidSignature(_) => "signature",
        BlockStorageError::ProofRefMismatch => "proof_ref",
        BlockStorageError::NoSuchBlock(_) => "no_such_block",
        BlockStorageError::ReceiptNotFound => "receipt_not_found",
        BlockStorageError::StateDesync(_) => "state_desync",
        BlockStorageError::PersistencePoisoned => "poisoned",
        BlockStorageError::Persistence(_) => "persistence",
    }
}
