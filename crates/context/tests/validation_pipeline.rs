//! End-to-end proposal/validation tests: the service validates its own
//! proposals, and each tampered field trips the right pipeline rule.

use async_trait::async_trait;
use concord_context::{
    ConsensusContextConfig, ConsensusContextService, ContextError, ResultsBlockValidationInput,
    TransactionsBlockValidationInput,
};
use concord_gossip::{GossipListener, Transport, TransportError};
use concord_messages::{RecipientMode, Topic};
use concord_mempool::{TransactionPoolConfig, TransactionPoolService};
use concord_signer::LocalSigner;
use concord_state::{StateStorage, StateStorageConfig};
use concord_types::test_utils::{signed_transaction_at, test_federation};
use concord_types::{
    BlockHeight, NodeAddress, ResultsBlock, Sha256, TimestampNano, TransactionsBlock,
    VirtualChainId,
};
use concord_vm::NativeVm;
use std::sync::Arc;
use std::time::Duration;

const VCHAIN: VirtualChainId = VirtualChainId(42);

struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(
        &self,
        _recipient_mode: RecipientMode,
        _recipients: &[NodeAddress],
        _payloads: Vec<Vec<u8>>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    fn register_listener(&self, _topic: Topic, _listener: Arc<dyn GossipListener>) {}
}

struct Harness {
    context: Arc<ConsensusContextService>,
    pool: Arc<TransactionPoolService>,
    keypairs: Vec<concord_types::KeyPair>,
}

fn harness() -> Harness {
    let (federation, keypairs) = test_federation(4);
    let state = Arc::new(StateStorage::new(StateStorageConfig::default()));
    let vm = Arc::new(NativeVm::new(state.clone()));
    let pool = TransactionPoolService::new(
        TransactionPoolConfig {
            virtual_chain_id: VCHAIN,
            ..Default::default()
        },
        Arc::new(federation),
        Arc::new(LocalSigner::new(keypairs[0].clone())),
        vm.clone(),
        Arc::new(NullTransport),
    );
    let context = ConsensusContextService::new(
        ConsensusContextConfig {
            virtual_chain_id: VCHAIN,
            min_transactions_in_block: 0,
            below_minimal_block_delay: Duration::from_millis(50),
            ..Default::default()
        },
        pool.clone(),
        vm,
        state,
    );
    Harness {
        context,
        pool,
        keypairs,
    }
}

/// Build a full valid proposal at height 1 with one transaction.
async fn proposal(h: &Harness) -> (TransactionsBlock, ResultsBlock) {
    let tx = signed_transaction_at(&h.keypairs[1], VCHAIN, TimestampNano::now(), 1);
    h.pool.add_new_transaction(tx).await.unwrap();

    let tx_block = h
        .context
        .request_new_transactions_block(BlockHeight(1), Sha256::ZERO, TimestampNano(0))
        .await
        .unwrap();
    let rx_block = h
        .context
        .request_new_results_block(BlockHeight(1), Sha256::ZERO, &tx_block)
        .await
        .unwrap();
    (tx_block, rx_block)
}

fn rx_input(tx_block: TransactionsBlock, rx_block: ResultsBlock) -> ResultsBlockValidationInput {
    ResultsBlockValidationInput {
        block_height: BlockHeight(1),
        prev_block_hash: Sha256::ZERO,
        transactions_block: tx_block,
        results_block: rx_block,
    }
}

#[tokio::test]
async fn a_fresh_proposal_validates_cleanly() {
    let h = harness();
    let (tx_block, rx_block) = proposal(&h).await;
    assert_eq!(tx_block.signed_transactions.len(), 1);

    h.context
        .validate_transactions_block(&TransactionsBlockValidationInput {
            block_height: BlockHeight(1),
            prev_block_hash: Sha256::ZERO,
            prev_block_timestamp: TimestampNano(0),
            transactions_block: tx_block.clone(),
        })
        .await
        .unwrap();

    h.context
        .validate_results_block(&rx_input(tx_block, rx_block))
        .await
        .unwrap();
}

#[tokio::test]
async fn tampered_state_diff_hash_trips_the_merkle_rule() {
    let h = harness();
    let (tx_block, mut rx_block) = proposal(&h).await;
    rx_block.header.state_diff_hash = Sha256::of(b"tampered");

    let err = h
        .context
        .validate_results_block(&rx_input(tx_block, rx_block))
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::MerkleMismatch("state diff")));
}

#[tokio::test]
async fn tampered_receipts_root_trips_the_merkle_rule() {
    let h = harness();
    let (tx_block, mut rx_block) = proposal(&h).await;
    rx_block.header.receipts_merkle_root = Sha256::of(b"tampered");

    let err = h
        .context
        .validate_results_block(&rx_input(tx_block, rx_block))
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::MerkleMismatch("receipts")));
}

#[tokio::test]
async fn dropped_receipt_changes_the_execution_comparison() {
    let h = harness();
    let (tx_block, mut rx_block) = proposal(&h).await;
    // Remove the receipt and recompute the header root so the structural
    // rule passes; re-execution then disagrees.
    rx_block.transaction_receipts.clear();
    rx_block.header.receipts_merkle_root = concord_types::merkle_root(&[]);

    let err = h
        .context
        .validate_results_block(&rx_input(tx_block, rx_block))
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::ExecutionMismatch("receipts")));
}

#[tokio::test]
async fn wrong_prev_hash_and_height_are_tagged() {
    let h = harness();
    let (tx_block, rx_block) = proposal(&h).await;

    let mut input = rx_input(tx_block.clone(), rx_block.clone());
    input.prev_block_hash = Sha256::of(b"someone else");
    let err = h.context.validate_results_block(&input).await.unwrap_err();
    assert!(matches!(err, ContextError::PrevHashMismatch));

    let mut input = rx_input(tx_block, rx_block);
    input.block_height = BlockHeight(2);
    let err = h.context.validate_results_block(&input).await.unwrap_err();
    assert!(matches!(err, ContextError::BlockHeightMismatch { .. }));
}

#[tokio::test]
async fn tampered_pre_execution_root_is_detected() {
    let h = harness();
    let (tx_block, mut rx_block) = proposal(&h).await;
    rx_block.header.pre_execution_state_merkle_root = Sha256::of(b"phantom state");

    let err = h
        .context
        .validate_results_block(&rx_input(tx_block, rx_block))
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::PreExecutionStateMismatch));
}

#[tokio::test]
async fn transactions_block_timestamp_must_advance() {
    let h = harness();
    let (tx_block, _) = proposal(&h).await;
    let stale = tx_block.header.timestamp;

    let err = h
        .context
        .validate_transactions_block(&TransactionsBlockValidationInput {
            block_height: BlockHeight(1),
            prev_block_hash: Sha256::ZERO,
            // Previous block claims a timestamp at/after the proposal's.
            prev_block_timestamp: stale,
            transactions_block: tx_block,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::TimestampOutOfRange));
}

#[tokio::test]
async fn proposals_without_minimum_wait_then_close_empty() {
    let (federation, keypairs) = test_federation(4);
    let state = Arc::new(StateStorage::new(StateStorageConfig::default()));
    let vm = Arc::new(NativeVm::new(state.clone()));
    let pool = TransactionPoolService::new(
        TransactionPoolConfig {
            virtual_chain_id: VCHAIN,
            ..Default::default()
        },
        Arc::new(federation),
        Arc::new(LocalSigner::new(keypairs[0].clone())),
        vm.clone(),
        Arc::new(NullTransport),
    );
    let context = ConsensusContextService::new(
        ConsensusContextConfig {
            virtual_chain_id: VCHAIN,
            min_transactions_in_block: 1,
            below_minimal_block_delay: Duration::from_millis(60),
            ..Default::default()
        },
        pool,
        vm,
        state,
    );

    let started = std::time::Instant::now();
    let block = context
        .request_new_transactions_block(BlockHeight(1), Sha256::ZERO, TimestampNano(0))
        .await
        .unwrap();
    assert!(block.signed_transactions.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(60));
}
