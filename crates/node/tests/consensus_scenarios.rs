//! Consensus scenarios over the in-process cluster: single-leader commit,
//! pool forwarding, fork rejection, validation refusal, quorum shortfall.

use async_trait::async_trait;
use concord_gossip::GossipListener;
use concord_messages::{
    encode_message, envelope_digest, BenchmarkConsensusMessage, CommitMessage,
    ForwardedTransactionsMessage, GossipHeader, RecipientMode, SenderSignature, Topic,
    BENCHMARK_CONSENSUS_COMMIT, TRANSACTION_RELAY_FORWARDED,
};
use concord_node::testkit::TestCluster;
use concord_storage::BlockStorageError;
use concord_types::test_utils::proven_block_pair;
use concord_types::{
    BlockHeight, BlockProof, NodeAddress, Sha256, TransactionStatus, VirtualChainId,
};
use concord_gossip::Transport;
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

const VCHAIN: VirtualChainId = VirtualChainId(42);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Scenario: federation of four, leader proposes, three validators reply,
/// the block closes with a three-signature proof.
#[tokio::test]
#[serial]
async fn single_leader_commit_reaches_every_node() {
    init_tracing();
    let cluster = TestCluster::start(4, &[]).await;

    let tx = cluster.transaction(1, 1);
    let response = cluster.leader().api.send_transaction(tx.clone()).await;
    assert_eq!(response.tx_status, TransactionStatus::Committed);
    let committed_height = response.block_height.expect("committed in some block");
    assert!(committed_height >= BlockHeight(1));

    // The committed block carries a quorum proof of three distinct members.
    let pair = cluster
        .leader()
        .storage
        .get_block_pair(committed_height)
        .unwrap()
        .unwrap();
    assert_eq!(pair.proof.signatures.len(), 3);

    // Every node converges on the commit and reports the tx committed.
    for i in 0..4 {
        cluster
            .wait_for_height(i, committed_height.0, Duration::from_secs(10))
            .await;
        let status = cluster.nodes[i].api.get_transaction_status(&tx.hash());
        assert_eq!(
            status.tx_status,
            TransactionStatus::Committed,
            "node {i} disagrees"
        );
    }
}

/// Observer transport peer recording relay traffic by sender.
struct RelaySniffer {
    forwards: Mutex<Vec<(NodeAddress, Vec<Sha256>)>>,
}

#[async_trait]
impl GossipListener for RelaySniffer {
    async fn on_message(&self, header: GossipHeader, payloads: Vec<Vec<u8>>) {
        if header.subtype != TRANSACTION_RELAY_FORWARDED {
            return;
        }
        if let Ok(message) = ForwardedTransactionsMessage::from_payloads(&payloads) {
            self.forwards.lock().push((
                message.sender.sender_node_address,
                message
                    .signed_transactions
                    .iter()
                    .map(|tx| tx.hash())
                    .collect(),
            ));
        }
    }
}

/// Scenario: node A admits T and forwards it; node B holds it pending and
/// does not re-forward.
#[tokio::test]
#[serial]
async fn forwarded_transactions_are_not_reforwarded() {
    init_tracing();
    // Hold consensus back entirely so the pool traffic is isolated.
    let cluster = TestCluster::start(4, &[0]).await;

    let sniffer = Arc::new(RelaySniffer {
        forwards: Mutex::new(Vec::new()),
    });
    let observer = cluster.hub.join(NodeAddress([0xEE; 20]));
    observer.register_listener(Topic::TransactionRelay, sniffer.clone());

    let node_a = &cluster.nodes[1];
    let node_b = &cluster.nodes[2];
    let tx = cluster.transaction(1, 7);
    node_a.pool.add_new_transaction(tx.clone()).await.unwrap();

    // B receives the forward and admits it.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !node_b.pool.has_pending(&tx.hash()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("forwarded transaction reached node B");

    // Within the observation window, only A ever forwarded hash(T).
    tokio::time::sleep(Duration::from_millis(200)).await;
    let forwards = sniffer.forwards.lock();
    let forwarders: Vec<NodeAddress> = forwards
        .iter()
        .filter(|(_, hashes)| hashes.contains(&tx.hash()))
        .map(|(sender, _)| *sender)
        .collect();
    assert_eq!(forwarders, vec![node_a.address]);
}

/// Scenario: a commit for an already-committed height with different
/// content is a fork; the node survives and keeps its tip.
#[tokio::test]
#[serial]
async fn conflicting_commit_is_rejected_as_fork() {
    init_tracing();
    let cluster = TestCluster::start(4, &[]).await;
    cluster.wait_for_height(2, 3, Duration::from_secs(10)).await;

    let node = &cluster.nodes[2];
    let tip_before = node.storage.tip_height();

    // A properly-proven block at height 1 whose content differs from what
    // the chain committed there.
    let keypairs: Vec<_> = (0..4).map(|i| concord_types::KeyPair::from_seed([i as u8 + 1; 32])).collect();
    let conflicting = proven_block_pair(
        &cluster.topology,
        &keypairs,
        None,
        VCHAIN,
        vec![cluster.transaction(3, 999)],
    );
    let err = node.storage.commit_block(conflicting).await.unwrap_err();
    assert!(matches!(err, BlockStorageError::ForkDetected(h) if h == BlockHeight(1)));

    assert!(node.storage.tip_height() >= tip_before);
    // The node keeps committing after the rejected fork.
    cluster
        .wait_for_height(2, tip_before.0 + 1, Duration::from_secs(10))
        .await;
}

/// Observer counting Committed replies on the consensus topic.
struct CommittedSniffer {
    replies: Mutex<Vec<(NodeAddress, BlockHeight)>>,
}

#[async_trait]
impl GossipListener for CommittedSniffer {
    async fn on_message(&self, header: GossipHeader, payloads: Vec<Vec<u8>>) {
        if let Ok(BenchmarkConsensusMessage::Committed(committed)) =
            BenchmarkConsensusMessage::decode(header.subtype, &payloads)
        {
            self.replies
                .lock()
                .push((committed.sender.sender_node_address, committed.block_height));
        }
    }
}

/// Scenario: a proposal whose state-diff hash does not match the computed
/// root draws no confirmation; a corrected proposal succeeds.
#[tokio::test]
#[serial]
async fn validators_stay_silent_on_a_tampered_results_block() {
    init_tracing();
    // Validators run; the leader seat is scripted by the test.
    let cluster = TestCluster::start(4, &[0]).await;
    let leader_keypair = cluster.nodes[0].keypair.clone();
    let driver = cluster.hub.join(leader_keypair.address());

    let sniffer = Arc::new(CommittedSniffer {
        replies: Mutex::new(Vec::new()),
    });
    driver.register_listener(Topic::BenchmarkConsensus, sniffer.clone());

    let keypairs: Vec<_> = (0..4).map(|i| concord_types::KeyPair::from_seed([i as u8 + 1; 32])).collect();
    let mut pair = proven_block_pair(&cluster.topology, &keypairs, None, VCHAIN, vec![]);
    pair.proof = BlockProof::default();

    let send_commit = |pair: concord_types::BlockPair| {
        let driver = driver.clone();
        let leader_keypair = leader_keypair.clone();
        async move {
            let digest = envelope_digest(
                Topic::BenchmarkConsensus,
                BENCHMARK_CONSENSUS_COMMIT,
                pair.block_ref(),
            );
            let message = CommitMessage {
                sender: SenderSignature {
                    sender_node_address: leader_keypair.address(),
                    signature: leader_keypair.sign(&digest),
                },
                block_pair: pair,
            };
            let header =
                GossipHeader::broadcast(Topic::BenchmarkConsensus, BENCHMARK_CONSENSUS_COMMIT, VCHAIN);
            driver
                .send(
                    RecipientMode::Broadcast,
                    &[],
                    encode_message(&header, message.to_payloads()),
                )
                .await
                .unwrap();
        }
    };

    // Tampered proposal: state-diff hash does not match the (empty) diffs.
    let mut tampered = pair.clone();
    tampered.results_block.header.state_diff_hash = Sha256::of(b"wrong");
    send_commit(tampered).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(
        sniffer.replies.lock().is_empty(),
        "no validator may confirm a tampered proposal"
    );

    // The corrected proposal draws confirmations from all three validators.
    send_commit(pair).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let distinct: std::collections::HashSet<NodeAddress> = sniffer
                .replies
                .lock()
                .iter()
                .filter(|(_, height)| *height == BlockHeight(1))
                .map(|(sender, _)| *sender)
                .collect();
            if distinct.len() == 3 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("all validators confirm the corrected proposal");
}

/// Scenario: two replies are below quorum; the leader holds the height
/// until a third validator appears.
#[tokio::test]
#[serial]
async fn quorum_shortfall_stalls_until_a_third_reply() {
    init_tracing();
    // Leader plus two validators: 3 nodes alive, quorum needs 3
    // confirmations from *validators*, so the height cannot advance.
    let cluster = TestCluster::start(4, &[3]).await;

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(
        cluster.leader().storage.tip_height(),
        BlockHeight(0),
        "leader must not advance on two confirmations"
    );

    // The held-back validator joins; quorum forms and the chain moves.
    cluster.nodes[3].start(&cluster.shutdown);
    cluster.wait_for_height(0, 1, Duration::from_secs(10)).await;
}
