//! Service wiring shared by the leader and validator roles.

use crate::{leader, validator, BenchmarkConsensusConfig};
use async_trait::async_trait;
use concord_context::ConsensusContextService;
use concord_gossip::{GossipListener, Transport};
use concord_messages::{
    encode_message, envelope_digest, BenchmarkConsensusMessage, CommitMessage, GossipHeader,
    RecipientMode, SenderSignature, Topic, BENCHMARK_CONSENSUS_COMMIT,
};
use concord_signer::Signer;
use concord_storage::{BlockConsensusHandler, BlockStorageService};
use concord_types::{BlockPair, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The benchmark consensus service. One instance per node; the federation
/// topology decides whether it runs the leader or the validator loop.
pub struct BenchmarkConsensus {
    pub(crate) config: BenchmarkConsensusConfig,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) context: Arc<ConsensusContextService>,
    pub(crate) storage: Arc<BlockStorageService>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) inbox_tx: mpsc::Sender<BenchmarkConsensusMessage>,
    pub(crate) inbox_rx: tokio::sync::Mutex<mpsc::Receiver<BenchmarkConsensusMessage>>,
}

impl BenchmarkConsensus {
    pub fn new(
        config: BenchmarkConsensusConfig,
        signer: Arc<dyn Signer>,
        context: Arc<ConsensusContextService>,
        storage: Arc<BlockStorageService>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel(64);
        let service = Arc::new(Self {
            config,
            signer,
            context,
            storage,
            transport,
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
        });
        // One-way injection: block storage holds only this callback
        // interface, never the algorithm itself.
        service
            .storage
            .register_consensus_handler(Arc::new(CommitObserver));
        service
    }

    pub fn is_leader(&self) -> bool {
        self.storage.topology().is_leader(self.signer.node_address())
    }

    /// Register the gossip listener and spawn the role task.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.transport.register_listener(
            Topic::BenchmarkConsensus,
            Arc::new(ConsensusTopicListener {
                service: self.clone(),
            }),
        );
        let service = self.clone();
        tokio::spawn(async move {
            if service.is_leader() {
                info!("starting benchmark consensus in leader role");
                leader::run(&service, shutdown).await;
            } else {
                info!(leader = ?service.storage.topology().leader(), "starting benchmark consensus in validator role");
                validator::run(&service, shutdown).await;
            }
        })
    }

    /// Broadcast a Commit message for `pair` to the federation.
    pub(crate) async fn send_commit(&self, pair: &BlockPair) -> bool {
        let block_ref = pair.block_ref();
        let digest = envelope_digest(
            Topic::BenchmarkConsensus,
            BENCHMARK_CONSENSUS_COMMIT,
            block_ref,
        );
        let signature = match self.signer.sign(&digest).await {
            Ok(signature) => signature,
            Err(e) => {
                warn!(error = %e, "could not sign commit message");
                return false;
            }
        };
        let message = CommitMessage {
            sender: SenderSignature {
                sender_node_address: self.signer.node_address(),
                signature,
            },
            block_pair: pair.clone(),
        };
        let header = GossipHeader::broadcast(
            Topic::BenchmarkConsensus,
            BENCHMARK_CONSENSUS_COMMIT,
            self.storage.config().virtual_chain_id,
        );
        let payloads = encode_message(&header, message.to_payloads());
        if let Err(e) = self
            .transport
            .send(RecipientMode::Broadcast, &[], payloads)
            .await
        {
            warn!(error = %e, "commit send failed");
            return false;
        }
        true
    }

    /// Check a Commit message's sender: must be the designated leader with
    /// a valid envelope signature over the pair's block-ref.
    pub(crate) fn verify_commit_sender(&self, message: &CommitMessage) -> bool {
        let topology = self.storage.topology();
        let sender = message.sender.sender_node_address;
        if !topology.is_leader(sender) {
            return false;
        }
        let Some(key) = topology.public_key_of(sender) else {
            return false;
        };
        let digest = envelope_digest(
            Topic::BenchmarkConsensus,
            BENCHMARK_CONSENSUS_COMMIT,
            message.block_pair.block_ref(),
        );
        key.verify(&digest, &message.sender.signature)
    }

    /// Check a Committed confirmation: the sender must be a federation
    /// member whose signature verifies over the claimed block-ref. The
    /// signature doubles as the member's block-proof entry.
    pub(crate) fn verify_committed_sender(
        &self,
        sender: &SenderSignature,
        block_ref: &Sha256,
    ) -> bool {
        let Some(key) = self
            .storage
            .topology()
            .public_key_of(sender.sender_node_address)
        else {
            return false;
        };
        key.verify(block_ref, &sender.signature)
    }
}

/// Listener feeding decoded consensus messages into the role task's inbox.
struct ConsensusTopicListener {
    service: Arc<BenchmarkConsensus>,
}

#[async_trait]
impl GossipListener for ConsensusTopicListener {
    async fn on_message(&self, header: GossipHeader, payloads: Vec<Vec<u8>>) {
        if header.virtual_chain_id != self.service.storage.config().virtual_chain_id {
            warn!(chain = %header.virtual_chain_id, "dropping consensus message for foreign chain");
            return;
        }
        match BenchmarkConsensusMessage::decode(header.subtype, &payloads) {
            Ok(message) => {
                // Backpressure to the topic queue when the role task lags.
                let _ = self.service.inbox_tx.send(message).await;
            }
            Err(e) => warn!(error = %e, "undecodable consensus message"),
        }
    }
}

/// The callback block storage invokes after every commit, whether it came
/// from this algorithm or from sync.
struct CommitObserver;

#[async_trait]
impl BlockConsensusHandler for CommitObserver {
    async fn on_block_committed(&self, pair: &BlockPair) {
        tracing::debug!(height = %pair.height(), "commit observed by consensus handler");
    }
}
