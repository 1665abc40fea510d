//! The transaction pool service.

use crate::committed::{CommittedPool, CommittedTransaction};
use crate::metrics;
use crate::pending::PendingPool;
use crate::validation::validate_transaction_statically;
use crate::{AdmissionReceipt, TransactionPoolConfig, TransactionRejected, TransactionResult};
use async_trait::async_trait;
use concord_gossip::{GossipListener, Transport};
use concord_messages::{
    encode_message, envelope_digest, forwarded_transactions_content_digest,
    ForwardedTransactionsMessage, GossipHeader, RecipientMode, SenderSignature, Topic,
    TRANSACTION_RELAY_FORWARDED,
};
use concord_signer::Signer;
use concord_types::{
    BlockHeight, FederationTopology, Sha256, SignedTransaction, TimestampNano,
    TransactionReceipt, TransactionStatus,
};
use concord_vm::{PreOrderVerdict, VirtualMachine};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives per-transaction outcomes: commits, expirations, and pre-order
/// removals.
#[async_trait]
pub trait TransactionResultsHandler: Send + Sync {
    async fn on_transaction_result(&self, result: &TransactionResult);
}

struct PoolState {
    pending: PendingPool,
    committed: CommittedPool,
    last_committed_height: BlockHeight,
    last_committed_timestamp: TimestampNano,
}

/// The pool service. All mutation is serialized by the writer side of one
/// lock; the forward buffer has its own small mutex so admissions do not
/// contend with the flush task.
pub struct TransactionPoolService {
    config: TransactionPoolConfig,
    topology: Arc<FederationTopology>,
    signer: Arc<dyn Signer>,
    vm: Arc<dyn VirtualMachine>,
    transport: Arc<dyn Transport>,
    state: RwLock<PoolState>,
    forward_buffer: Mutex<Vec<Arc<SignedTransaction>>>,
    handlers: RwLock<Vec<Arc<dyn TransactionResultsHandler>>>,
}

impl TransactionPoolService {
    pub fn new(
        config: TransactionPoolConfig,
        topology: Arc<FederationTopology>,
        signer: Arc<dyn Signer>,
        vm: Arc<dyn VirtualMachine>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let pending = PendingPool::new(config.pending_pool_size_in_bytes);
        Arc::new(Self {
            config,
            topology,
            signer,
            vm,
            transport,
            state: RwLock::new(PoolState {
                pending,
                committed: CommittedPool::new(),
                last_committed_height: BlockHeight::GENESIS,
                last_committed_timestamp: TimestampNano(0),
            }),
            forward_buffer: Mutex::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
        })
    }

    pub fn register_results_handler(&self, handler: Arc<dyn TransactionResultsHandler>) {
        self.handlers.write().push(handler);
    }

    /// Register the relay listener with the transport and start the
    /// periodic tasks: forward flushing and the two expiration sweeps.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        self.transport.register_listener(
            Topic::TransactionRelay,
            Arc::new(TransactionRelayListener { pool: self.clone() }),
        );

        let mut handles = Vec::new();

        let pool = self.clone();
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.config.forward_flush_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tick.tick() => pool.flush_forwards().await,
                }
            }
        }));

        let pool = self.clone();
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(pool.config.pending_pool_clear_expired_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tick.tick() => pool.clear_expired_pending().await,
                }
            }
        }));

        let pool = self.clone();
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(pool.config.committed_pool_clear_expired_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tick.tick() => pool.clear_expired_committed(),
                }
            }
        }));

        handles
    }

    /// Admit a locally submitted transaction and queue it for forwarding.
    pub async fn add_new_transaction(
        &self,
        transaction: SignedTransaction,
    ) -> Result<AdmissionReceipt, TransactionRejected> {
        let transaction = Arc::new(transaction);
        let receipt = self.admit(transaction.clone(), self.signer.public_key())?;

        {
            let mut buffer = self.forward_buffer.lock();
            buffer.push(transaction);
            if buffer.len() < self.config.forward_batch_size {
                return Ok(receipt);
            }
        }
        // Buffer crossed the batch threshold; flush without waiting for
        // the interval tick.
        self.flush_forwards().await;
        Ok(receipt)
    }

    /// Shared admission path. Validates, deduplicates, and inserts; does
    /// not forward.
    fn admit(
        &self,
        transaction: Arc<SignedTransaction>,
        gateway_public_key: concord_types::PublicKey,
    ) -> Result<AdmissionReceipt, TransactionRejected> {
        let now = TimestampNano::now();
        if let Err(rejection) =
            validate_transaction_statically(&self.config, &transaction, now)
        {
            self.record_rejection(rejection);
            return Err(rejection);
        }

        let mut state = self.state.write();
        if state.committed.has(&transaction.hash()) {
            let rejection = TransactionRejected::new(
                TransactionStatus::DuplicateTransactionAlreadyCommitted,
            );
            self.record_rejection(rejection);
            return Err(rejection);
        }
        let txhash = state
            .pending
            .add(transaction, gateway_public_key)
            .map_err(|rejection| {
                self.record_rejection(rejection);
                rejection
            })?;

        let m = metrics::get();
        m.transactions_admitted.inc();
        m.pending_transactions.set(state.pending.len() as f64);
        m.pending_pool_bytes.set(state.pending.size_in_bytes() as f64);

        Ok(AdmissionReceipt {
            txhash,
            status: TransactionStatus::Pending,
            pending_count: state.pending.len(),
            pending_bytes: state.pending.size_in_bytes(),
        })
    }

    fn record_rejection(&self, rejection: TransactionRejected) {
        metrics::get()
            .transactions_rejected
            .with_label_values(&[&rejection.status.to_string()])
            .inc();
    }

    /// Admit a batch forwarded by another federation member. The sender's
    /// envelope signature covers the concatenated transaction hashes; a
    /// batch with a bad signature is dropped whole.
    pub async fn handle_forwarded_transactions(
        &self,
        message: ForwardedTransactionsMessage,
    ) -> Result<(), TransactionRejected> {
        let sender = message.sender.sender_node_address;
        let Some(sender_key) = self.topology.public_key_of(sender) else {
            warn!(sender = ?sender, "forwarded batch from non-federation sender dropped");
            return Err(TransactionRejected::new(
                TransactionStatus::RejectedSignatureMismatch,
            ));
        };
        let digest = envelope_digest(
            Topic::TransactionRelay,
            TRANSACTION_RELAY_FORWARDED,
            forwarded_transactions_content_digest(&message.signed_transactions),
        );
        if !sender_key.verify(&digest, &message.sender.signature) {
            warn!(sender = ?sender, "forwarded batch with bad signature dropped");
            return Err(TransactionRejected::new(
                TransactionStatus::RejectedSignatureMismatch,
            ));
        }

        let gateway_key = *sender_key;
        for transaction in message.signed_transactions {
            // Per-transaction rejections (duplicates especially) are
            // expected here and do not fail the batch.
            if let Err(rejection) = self.admit(Arc::new(transaction), gateway_key) {
                debug!(status = %rejection.status, "forwarded transaction not admitted");
            }
        }
        Ok(())
    }

    /// Oldest-first batch for a new proposal, pre-order checked. Failing
    /// transactions are removed from the pool with
    /// `RejectedSmartContractPreOrder`.
    pub async fn get_transactions_for_ordering(
        &self,
        max_count: usize,
        max_bytes: usize,
        block_height: BlockHeight,
        block_timestamp: TimestampNano,
    ) -> Vec<Arc<SignedTransaction>> {
        let candidates = self.state.read().pending.batch(max_count, max_bytes);
        if candidates.is_empty() {
            return candidates;
        }

        let owned: Vec<SignedTransaction> =
            candidates.iter().map(|tx| (**tx).clone()).collect();
        let verdicts = match self
            .vm
            .pre_order_check(&owned, block_height, block_timestamp)
            .await
        {
            Ok(verdicts) => verdicts,
            Err(e) => {
                warn!(error = %e, "pre-order check failed; proposing no transactions");
                return Vec::new();
            }
        };

        let mut survivors = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for (candidate, verdict) in candidates.into_iter().zip(verdicts) {
            match verdict {
                PreOrderVerdict::Valid => survivors.push(candidate),
                PreOrderVerdict::Rejected => rejected.push(candidate),
            }
        }

        if !rejected.is_empty() {
            let (height, timestamp) = {
                let mut state = self.state.write();
                for tx in &rejected {
                    state.pending.remove(&tx.hash());
                }
                (state.last_committed_height, state.last_committed_timestamp)
            };
            for tx in rejected {
                self.record_rejection(TransactionRejected::new(
                    TransactionStatus::RejectedSmartContractPreOrder,
                ));
                self.notify_handlers(TransactionResult {
                    txhash: tx.hash(),
                    status: TransactionStatus::RejectedSmartContractPreOrder,
                    block_height: height,
                    block_timestamp: timestamp,
                })
                .await;
            }
        }
        survivors
    }

    /// Non-leader validation of a proposed ordering. Checks committed-pool
    /// duplicates, timestamps against the block timestamp, and pre-order;
    /// never mutates the pending pool.
    pub async fn validate_transactions_for_ordering(
        &self,
        transactions: &[SignedTransaction],
        block_height: BlockHeight,
        block_timestamp: TimestampNano,
    ) -> Result<(), TransactionRejected> {
        {
            let state = self.state.read();
            for tx in transactions {
                if state.committed.has(&tx.hash()) {
                    return Err(TransactionRejected::new(
                        TransactionStatus::DuplicateTransactionAlreadyCommitted,
                    ));
                }
                validate_transaction_statically(&self.config, tx, block_timestamp)?;
            }
        }

        let verdicts = self
            .vm
            .pre_order_check(transactions, block_height, block_timestamp)
            .await
            .map_err(|_| {
                TransactionRejected::new(TransactionStatus::RejectedSmartContractPreOrder)
            })?;
        if verdicts
            .iter()
            .any(|v| *v == PreOrderVerdict::Rejected)
        {
            return Err(TransactionRejected::new(
                TransactionStatus::RejectedSmartContractPreOrder,
            ));
        }
        Ok(())
    }

    /// Record a committed block's receipts. Commits must arrive in strictly
    /// increasing height order; anything else is ignored as a no-op that
    /// still reports the next desired height.
    pub async fn commit_transaction_receipts(
        &self,
        block_height: BlockHeight,
        block_timestamp: TimestampNano,
        receipts: &[TransactionReceipt],
    ) -> BlockHeight {
        let mut results = Vec::with_capacity(receipts.len());
        {
            let mut state = self.state.write();
            let expected = state.last_committed_height.next();
            if block_height != expected {
                metrics::get().out_of_order_commits_ignored.inc();
                debug!(
                    %block_height,
                    %expected,
                    "ignoring out-of-order commit notification"
                );
                return expected;
            }

            for receipt in receipts {
                if let Some(entry) = state.pending.entry(&receipt.txhash) {
                    tracing::trace!(
                        txhash = ?receipt.txhash,
                        gateway = ?entry.gateway_public_key,
                        "committing locally known transaction"
                    );
                }
                state.pending.remove(&receipt.txhash);
                state
                    .committed
                    .add(receipt.clone(), block_height, block_timestamp);
                results.push(TransactionResult {
                    txhash: receipt.txhash,
                    status: TransactionStatus::Committed,
                    block_height,
                    block_timestamp,
                });
            }
            state.last_committed_height = block_height;
            state.last_committed_timestamp = block_timestamp;

            let m = metrics::get();
            m.transactions_committed.inc_by(receipts.len() as f64);
            m.pending_transactions.set(state.pending.len() as f64);
            m.pending_pool_bytes.set(state.pending.size_in_bytes() as f64);
            m.committed_transactions.set(state.committed.len() as f64);
        }

        for result in &results {
            self.notify_handlers(result.clone()).await;
        }
        self.state.read().last_committed_height.next()
    }

    /// Pool-side view of a transaction's status.
    pub fn get_transaction_status(
        &self,
        txhash: &Sha256,
    ) -> (TransactionStatus, Option<CommittedTransaction>) {
        let state = self.state.read();
        if let Some(committed) = state.committed.get(txhash) {
            return (TransactionStatus::Committed, Some(committed.clone()));
        }
        if state.pending.has(txhash) {
            return (TransactionStatus::Pending, None);
        }
        (TransactionStatus::NoRecord, None)
    }

    pub fn has_pending(&self, txhash: &Sha256) -> bool {
        self.state.read().pending.has(txhash)
    }

    pub fn last_committed_height(&self) -> BlockHeight {
        self.state.read().last_committed_height
    }

    /// Broadcast the buffered admissions as one signed forward batch.
    async fn flush_forwards(&self) {
        let batch: Vec<Arc<SignedTransaction>> =
            std::mem::take(&mut *self.forward_buffer.lock());
        if batch.is_empty() {
            return;
        }
        let transactions: Vec<SignedTransaction> =
            batch.iter().map(|tx| (**tx).clone()).collect();
        let digest = envelope_digest(
            Topic::TransactionRelay,
            TRANSACTION_RELAY_FORWARDED,
            forwarded_transactions_content_digest(&transactions),
        );
        let signature = match self.signer.sign(&digest).await {
            Ok(signature) => signature,
            Err(e) => {
                warn!(error = %e, "could not sign forward batch; requeueing");
                self.forward_buffer.lock().extend(batch);
                return;
            }
        };
        let message = ForwardedTransactionsMessage {
            sender: SenderSignature {
                sender_node_address: self.signer.node_address(),
                signature,
            },
            signed_transactions: transactions,
        };
        let header = GossipHeader::broadcast(
            Topic::TransactionRelay,
            TRANSACTION_RELAY_FORWARDED,
            self.config.virtual_chain_id,
        );
        let payloads = encode_message(&header, message.to_payloads());
        if let Err(e) = self
            .transport
            .send(RecipientMode::Broadcast, &[], payloads)
            .await
        {
            warn!(error = %e, "forward broadcast failed");
            return;
        }
        metrics::get()
            .transactions_forwarded
            .inc_by(batch.len() as f64);
    }

    /// The pending sweep: drop transactions whose body timestamp fell out
    /// of the expiration window.
    async fn clear_expired_pending(&self) {
        let cutoff =
            TimestampNano::now().saturating_sub(self.config.transaction_expiration_window);
        let (expired, height, timestamp) = {
            let mut state = self.state.write();
            let expired = state.pending.expire_older_than(cutoff);
            let m = metrics::get();
            m.pending_transactions.set(state.pending.len() as f64);
            m.pending_pool_bytes.set(state.pending.size_in_bytes() as f64);
            (
                expired,
                state.last_committed_height,
                state.last_committed_timestamp,
            )
        };
        if expired.is_empty() {
            return;
        }
        info!(count = expired.len(), "expired pending transactions");
        metrics::get()
            .transactions_expired
            .inc_by(expired.len() as f64);
        for tx in expired {
            self.notify_handlers(TransactionResult {
                txhash: tx.hash(),
                status: TransactionStatus::RejectedTimestampWindowExceeded,
                block_height: height,
                block_timestamp: timestamp,
            })
            .await;
        }
    }

    /// The committed sweep: drop receipts past the retention window.
    fn clear_expired_committed(&self) {
        let cutoff = TimestampNano::now().saturating_sub(self.config.committed_pool_retention);
        let mut state = self.state.write();
        let dropped = state.committed.expire_committed_before(cutoff);
        if dropped > 0 {
            debug!(count = dropped, "expired committed receipts");
            metrics::get()
                .committed_transactions
                .set(state.committed.len() as f64);
        }
    }

    async fn notify_handlers(&self, result: TransactionResult) {
        let handlers: Vec<_> = self.handlers.read().iter().cloned().collect();
        for handler in handlers {
            handler.on_transaction_result(&result).await;
        }
    }
}

/// Routes `TRANSACTION_RELAY` gossip into the pool.
struct TransactionRelayListener {
    pool: Arc<TransactionPoolService>,
}

#[async_trait]
impl GossipListener for TransactionRelayListener {
    async fn on_message(&self, header: GossipHeader, payloads: Vec<Vec<u8>>) {
        if header.virtual_chain_id != self.pool.config.virtual_chain_id {
            warn!(
                chain = %header.virtual_chain_id,
                "dropping relay message for foreign virtual chain"
            );
            return;
        }
        if header.subtype != TRANSACTION_RELAY_FORWARDED {
            warn!(subtype = header.subtype, "unknown relay subtype");
            return;
        }
        match ForwardedTransactionsMessage::from_payloads(&payloads) {
            Ok(message) => {
                let _ = self.pool.handle_forwarded_transactions(message).await;
            }
            Err(e) => warn!(error = %e, "undecodable forwarded batch"),
        }
    }
}
