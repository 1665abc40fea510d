//! Pool service tests over a capturing transport and the native VM.

use async_trait::async_trait;
use concord_gossip::{GossipListener, Transport, TransportError};
use concord_messages::{
    decode_header, envelope_digest, forwarded_transactions_content_digest,
    ForwardedTransactionsMessage, RecipientMode, SenderSignature, Topic,
    TRANSACTION_RELAY_FORWARDED,
};
use concord_mempool::{TransactionPoolConfig, TransactionPoolService};
use concord_signer::LocalSigner;
use concord_state::{StateStorage, StateStorageConfig};
use concord_types::test_utils::{signed_transaction_at, test_federation};
use concord_types::{
    BlockHeight, ExecutionResult, NodeAddress, Sha256, SignedTransaction, TimestampNano,
    TransactionReceipt, TransactionStatus, VirtualChainId,
};
use concord_vm::NativeVm;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const VCHAIN: VirtualChainId = VirtualChainId(42);

/// Transport double that records everything sent through it.
#[derive(Default)]
struct CapturingTransport {
    sent: Mutex<Vec<Vec<Vec<u8>>>>,
}

#[async_trait]
impl Transport for CapturingTransport {
    async fn send(
        &self,
        _recipient_mode: RecipientMode,
        _recipients: &[NodeAddress],
        payloads: Vec<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.sent.lock().push(payloads);
        Ok(())
    }

    fn register_listener(&self, _topic: Topic, _listener: Arc<dyn GossipListener>) {}
}

struct Harness {
    pool: Arc<TransactionPoolService>,
    transport: Arc<CapturingTransport>,
    federation: concord_types::FederationTopology,
    keypairs: Vec<concord_types::KeyPair>,
}

fn harness() -> Harness {
    let (federation, keypairs) = test_federation(4);
    let transport = Arc::new(CapturingTransport::default());
    let state = Arc::new(StateStorage::new(StateStorageConfig::default()));
    let vm = Arc::new(NativeVm::new(state));
    let signer = Arc::new(LocalSigner::new(keypairs[0].clone()));
    let config = TransactionPoolConfig {
        virtual_chain_id: VCHAIN,
        forward_flush_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let pool = TransactionPoolService::new(
        config,
        Arc::new(federation.clone()),
        signer,
        vm,
        transport.clone(),
    );
    Harness {
        pool,
        transport,
        federation,
        keypairs,
    }
}

fn fresh_tx(h: &Harness, salt: u64) -> SignedTransaction {
    signed_transaction_at(&h.keypairs[1], VCHAIN, TimestampNano::now(), salt)
}

fn receipt_for(tx: &SignedTransaction) -> TransactionReceipt {
    TransactionReceipt {
        txhash: tx.hash(),
        execution_result: ExecutionResult::Success,
        output_arguments: vec![],
        output_events: vec![],
    }
}

#[tokio::test]
async fn admission_then_commit_moves_between_pools() {
    let h = harness();
    let tx = fresh_tx(&h, 1);
    let admitted = h.pool.add_new_transaction(tx.clone()).await.unwrap();
    assert_eq!(admitted.status, TransactionStatus::Pending);
    assert!(h.pool.has_pending(&tx.hash()));

    let next = h
        .pool
        .commit_transaction_receipts(BlockHeight(1), TimestampNano::now(), &[receipt_for(&tx)])
        .await;
    assert_eq!(next, BlockHeight(2));
    assert!(!h.pool.has_pending(&tx.hash()));

    let (status, committed) = h.pool.get_transaction_status(&tx.hash());
    assert_eq!(status, TransactionStatus::Committed);
    assert_eq!(committed.unwrap().block_height, BlockHeight(1));
}

#[tokio::test]
async fn committed_duplicates_are_rejected_on_readmission() {
    let h = harness();
    let tx = fresh_tx(&h, 1);
    h.pool.add_new_transaction(tx.clone()).await.unwrap();
    h.pool
        .commit_transaction_receipts(BlockHeight(1), TimestampNano::now(), &[receipt_for(&tx)])
        .await;

    let err = h.pool.add_new_transaction(tx).await.unwrap_err();
    assert_eq!(
        err.status,
        TransactionStatus::DuplicateTransactionAlreadyCommitted
    );
}

#[tokio::test]
async fn out_of_order_commits_are_ignored_no_ops() {
    let h = harness();
    let tx = fresh_tx(&h, 1);
    h.pool.add_new_transaction(tx.clone()).await.unwrap();

    // Height 3 while expecting 1: ignored, next desired stays 1.
    let next = h
        .pool
        .commit_transaction_receipts(BlockHeight(3), TimestampNano::now(), &[receipt_for(&tx)])
        .await;
    assert_eq!(next, BlockHeight(1));
    assert!(h.pool.has_pending(&tx.hash()));

    // Replay of an already-committed height is equally a no-op.
    h.pool
        .commit_transaction_receipts(BlockHeight(1), TimestampNano::now(), &[receipt_for(&tx)])
        .await;
    let next = h
        .pool
        .commit_transaction_receipts(BlockHeight(1), TimestampNano::now(), &[receipt_for(&tx)])
        .await;
    assert_eq!(next, BlockHeight(2));
}

#[tokio::test]
async fn forwarded_batch_with_valid_signature_is_admitted_without_reforward() {
    let h = harness();
    let sender = &h.keypairs[2];
    let tx = signed_transaction_at(sender, VCHAIN, TimestampNano::now(), 77);

    let digest = envelope_digest(
        Topic::TransactionRelay,
        TRANSACTION_RELAY_FORWARDED,
        forwarded_transactions_content_digest(std::slice::from_ref(&tx)),
    );
    let message = ForwardedTransactionsMessage {
        sender: SenderSignature {
            sender_node_address: sender.address(),
            signature: sender.sign(&digest),
        },
        signed_transactions: vec![tx.clone()],
    };
    h.pool.handle_forwarded_transactions(message).await.unwrap();
    assert!(h.pool.has_pending(&tx.hash()));

    // The forwarded path must not re-forward: nothing hits the transport
    // even after the flush interval would have fired.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.transport.sent.lock().is_empty());
}

#[tokio::test]
async fn forwarded_batch_with_bad_signature_is_dropped_whole() {
    let h = harness();
    let sender = &h.keypairs[2];
    let tx = signed_transaction_at(sender, VCHAIN, TimestampNano::now(), 78);

    let message = ForwardedTransactionsMessage {
        sender: SenderSignature {
            sender_node_address: sender.address(),
            signature: sender.sign(&Sha256::of(b"not the content digest")),
        },
        signed_transactions: vec![tx.clone()],
    };
    assert!(h.pool.handle_forwarded_transactions(message).await.is_err());
    assert!(!h.pool.has_pending(&tx.hash()));
}

#[tokio::test]
async fn local_admissions_are_broadcast_by_the_flush_task() {
    let h = harness();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let _handles = h.pool.start(shutdown.clone());

    let tx = fresh_tx(&h, 5);
    h.pool.add_new_transaction(tx.clone()).await.unwrap();

    // Wait for the flush task to broadcast the batch.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !h.transport.sent.lock().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("forward broadcast observed");

    let sent = h.transport.sent.lock();
    let (header, body) = decode_header(&sent[0]).unwrap();
    assert_eq!(header.topic, Topic::TransactionRelay);
    let message = ForwardedTransactionsMessage::from_payloads(body).unwrap();
    assert_eq!(message.signed_transactions, vec![tx]);
    assert_eq!(
        message.sender.sender_node_address,
        h.federation.members()[0].address
    );

    shutdown.cancel();
}

#[tokio::test]
async fn ordering_batch_prunes_pre_order_rejections() {
    let (federation, keypairs) = test_federation(4);
    let transport = Arc::new(CapturingTransport::default());
    let state = Arc::new(StateStorage::new(StateStorageConfig::default()));
    // Reject any transaction with salt 13 at pre-order time.
    let vm = Arc::new(NativeVm::with_pre_order_rule(state, |tx| {
        tx.transaction.salt != 13
    }));
    let signer = Arc::new(LocalSigner::new(keypairs[0].clone()));
    let pool = TransactionPoolService::new(
        TransactionPoolConfig {
            virtual_chain_id: VCHAIN,
            ..Default::default()
        },
        Arc::new(federation),
        signer,
        vm,
        transport,
    );

    let good = signed_transaction_at(&keypairs[1], VCHAIN, TimestampNano::now(), 1);
    let doomed = signed_transaction_at(&keypairs[1], VCHAIN, TimestampNano::now(), 13);
    pool.add_new_transaction(good.clone()).await.unwrap();
    pool.add_new_transaction(doomed.clone()).await.unwrap();

    let batch = pool
        .get_transactions_for_ordering(10, 0, BlockHeight(1), TimestampNano::now())
        .await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].hash(), good.hash());

    // The rejected transaction left the pool entirely.
    assert!(!pool.has_pending(&doomed.hash()));
}

#[tokio::test]
async fn proposal_validation_rejects_committed_duplicates() {
    let h = harness();
    let tx = fresh_tx(&h, 1);
    h.pool.add_new_transaction(tx.clone()).await.unwrap();
    h.pool
        .commit_transaction_receipts(BlockHeight(1), TimestampNano::now(), &[receipt_for(&tx)])
        .await;

    let err = h
        .pool
        .validate_transactions_for_ordering(&[tx], BlockHeight(2), TimestampNano::now())
        .await
        .unwrap_err();
    assert_eq!(
        err.status,
        TransactionStatus::DuplicateTransactionAlreadyCommitted
    );
}
