//! The public API service.
//!
//! In-process implementation of the RPCs the external HTTP layer exposes.
//! The HTTP glue itself lives outside this codebase; these methods are its
//! complete contract.

use async_trait::async_trait;
use concord_mempool::{
    TransactionPoolService, TransactionResult, TransactionResultsHandler,
};
use concord_storage::{BlockStorageService, ReceiptProof};
use concord_types::{
    BlockHeight, Sha256, SignedTransaction, TransactionReceipt, TransactionStatus,
};
use concord_vm::{QueryResult, VirtualMachine, VmError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no receipt on record for the requested transaction")]
    ReceiptNotFound,
    #[error(transparent)]
    Query(#[from] VmError),
    #[error("storage error: {0}")]
    Storage(#[from] concord_storage::BlockStorageError),
}

/// Response to `send_transaction` and `get_transaction_status`.
#[derive(Debug, Clone)]
pub struct TransactionStatusResponse {
    pub tx_status: TransactionStatus,
    pub txhash: Sha256,
    pub receipt: Option<TransactionReceipt>,
    pub block_height: Option<BlockHeight>,
}

type Waiters = Mutex<HashMap<Sha256, Vec<oneshot::Sender<TransactionResult>>>>;

/// The RPC surface consumed by the HTTP layer.
pub struct PublicApiService {
    pool: Arc<TransactionPoolService>,
    storage: Arc<BlockStorageService>,
    vm: Arc<dyn VirtualMachine>,
    query_grace_timeout: Duration,
    waiters: Arc<Waiters>,
}

impl PublicApiService {
    pub fn new(
        pool: Arc<TransactionPoolService>,
        storage: Arc<BlockStorageService>,
        vm: Arc<dyn VirtualMachine>,
        query_grace_timeout: Duration,
    ) -> Arc<Self> {
        let waiters: Arc<Waiters> = Arc::new(Mutex::new(HashMap::new()));
        pool.register_results_handler(Arc::new(WaiterNotifier {
            waiters: waiters.clone(),
        }));
        Arc::new(Self {
            pool,
            storage,
            vm,
            query_grace_timeout,
            waiters,
        })
    }

    /// Admit and wait (bounded) for the transaction to commit.
    pub async fn send_transaction(
        &self,
        transaction: SignedTransaction,
    ) -> TransactionStatusResponse {
        let txhash = transaction.hash();
        let receiver = self.subscribe(txhash);

        match self.pool.add_new_transaction(transaction).await {
            Ok(_) => {}
            Err(rejected) => {
                self.unsubscribe(&txhash);
                return TransactionStatusResponse {
                    tx_status: rejected.status,
                    txhash,
                    receipt: None,
                    block_height: None,
                };
            }
        }

        match tokio::time::timeout(self.query_grace_timeout, receiver).await {
            Ok(Ok(result)) => {
                let receipt = match result.status {
                    TransactionStatus::Committed => self
                        .pool
                        .get_transaction_status(&txhash)
                        .1
                        .map(|committed| committed.receipt),
                    _ => None,
                };
                TransactionStatusResponse {
                    tx_status: result.status,
                    txhash,
                    receipt,
                    block_height: Some(result.block_height),
                }
            }
            _ => {
                // Still pending when the grace window closed.
                self.unsubscribe(&txhash);
                TransactionStatusResponse {
                    tx_status: TransactionStatus::Pending,
                    txhash,
                    receipt: None,
                    block_height: None,
                }
            }
        }
    }

    /// Admit without waiting for commitment.
    pub async fn send_transaction_async(
        &self,
        transaction: SignedTransaction,
    ) -> TransactionStatusResponse {
        let txhash = transaction.hash();
        let tx_status = match self.pool.add_new_transaction(transaction).await {
            Ok(receipt) => receipt.status,
            Err(rejected) => rejected.status,
        };
        TransactionStatusResponse {
            tx_status,
            txhash,
            receipt: None,
            block_height: None,
        }
    }

    /// Run a read-only query against the latest committed state.
    pub async fn run_query(&self, query: &SignedTransaction) -> Result<QueryResult, ApiError> {
        Ok(self.vm.run_query(query).await?)
    }

    /// Pool first, then the storage receipts index.
    pub fn get_transaction_status(&self, txhash: &Sha256) -> TransactionStatusResponse {
        let (status, committed) = self.pool.get_transaction_status(txhash);
        if status != TransactionStatus::NoRecord {
            let (receipt, block_height) = committed
                .map(|c| (Some(c.receipt), Some(c.block_height)))
                .unwrap_or((None, None));
            return TransactionStatusResponse {
                tx_status: status,
                txhash: *txhash,
                receipt,
                block_height,
            };
        }
        match self.storage.get_transaction_receipt(txhash) {
            Ok(Some((receipt, height, _))) => TransactionStatusResponse {
                tx_status: TransactionStatus::Committed,
                txhash: *txhash,
                receipt: Some(receipt),
                block_height: Some(height),
            },
            _ => TransactionStatusResponse {
                tx_status: TransactionStatus::NoRecord,
                txhash: *txhash,
                receipt: None,
                block_height: None,
            },
        }
    }

    /// Receipt plus Merkle branch plus block proof.
    pub fn get_transaction_receipt_proof(
        &self,
        txhash: &Sha256,
    ) -> Result<ReceiptProof, ApiError> {
        match self.storage.generate_receipt_proof(txhash) {
            Ok(proof) => Ok(proof),
            Err(concord_storage::BlockStorageError::ReceiptNotFound) => {
                Err(ApiError::ReceiptNotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn subscribe(&self, txhash: Sha256) -> oneshot::Receiver<TransactionResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(txhash).or_default().push(tx);
        rx
    }

    fn unsubscribe(&self, txhash: &Sha256) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(txhash) {
            list.retain(|sender| !sender.is_closed());
            if list.is_empty() {
                waiters.remove(txhash);
            }
        }
    }
}

/// Pool results handler resolving `send_transaction` waiters.
struct WaiterNotifier {
    waiters: Arc<Waiters>,
}

#[async_trait]
impl TransactionResultsHandler for WaiterNotifier {
    async fn on_transaction_result(&self, result: &TransactionResult) {
        let senders = self.waiters.lock().remove(&result.txhash);
        if let Some(senders) = senders {
            for sender in senders {
                let _ = sender.send(result.clone());
            }
        }
    }
}
