//! Inter-node block sync.
//!
//! The petitioner side is a five-state machine driven by a dedicated task:
//!
//! ```text
//! Idle → CollectingAvailabilityResponses → FinishedCAR
//!      → WaitingForChunks → ProcessingBlocks → (collect again)
//! ```
//!
//! Idle is left after `sync_no_commit_interval` passes without a commit.
//! Each state handler returns the next state, mirroring the conduit-driven
//! design of the original protocol: gossip listeners feed availability
//! responses and chunk responses into channels the state handlers drain.
//!
//! The source side answers availability requests from its own persisted
//! history and serves chunk requests capped at the configured batch size.

use crate::metrics;
use crate::service::BlockStorageService;
use async_trait::async_trait;
use concord_gossip::{GossipListener, Transport};
use concord_messages::{
    encode_message, envelope_digest, sync_range_content_digest,
    BlockAvailabilityRequestMessage, BlockAvailabilityResponseMessage, BlockSyncMessage,
    BlockSyncRequestMessage, BlockSyncResponseMessage, GossipHeader, RecipientMode,
    SenderSignature, Topic, BLOCK_SYNC_AVAILABILITY_REQUEST, BLOCK_SYNC_AVAILABILITY_RESPONSE,
    BLOCK_SYNC_CHUNK_REQUEST, BLOCK_SYNC_CHUNK_RESPONSE,
};
use concord_signer::Signer;
use concord_types::{BlockHeight, NodeAddress};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum SyncState {
    Idle,
    CollectingAvailabilityResponses,
    FinishedCar(Vec<BlockAvailabilityResponseMessage>),
    WaitingForChunks(NodeAddress),
    ProcessingBlocks(BlockSyncResponseMessage),
}

impl SyncState {
    fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::CollectingAvailabilityResponses => "collecting_availability_responses",
            SyncState::FinishedCar(_) => "finished_car",
            SyncState::WaitingForChunks(_) => "waiting_for_chunks",
            SyncState::ProcessingBlocks(_) => "processing_blocks",
        }
    }
}

/// The sync service: petitioner state machine plus source responder.
pub struct BlockSync {
    storage: Arc<BlockStorageService>,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
    responses_rx: tokio::sync::Mutex<mpsc::Receiver<BlockAvailabilityResponseMessage>>,
    chunks_rx: tokio::sync::Mutex<mpsc::Receiver<BlockSyncResponseMessage>>,
    responses_tx: mpsc::Sender<BlockAvailabilityResponseMessage>,
    chunks_tx: mpsc::Sender<BlockSyncResponseMessage>,
}

impl BlockSync {
    pub fn new(
        storage: Arc<BlockStorageService>,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn Signer>,
    ) -> Arc<Self> {
        let (responses_tx, responses_rx) = mpsc::channel(32);
        let (chunks_tx, chunks_rx) = mpsc::channel(8);
        Arc::new(Self {
            storage,
            transport,
            signer,
            responses_rx: tokio::sync::Mutex::new(responses_rx),
            chunks_rx: tokio::sync::Mutex::new(chunks_rx),
            responses_tx,
            chunks_tx,
        })
    }

    /// Register the BLOCK_SYNC listener and spawn the petitioner task.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.transport.register_listener(
            Topic::BlockSync,
            Arc::new(BlockSyncListener { sync: self.clone() }),
        );
        let sync = self.clone();
        tokio::spawn(async move { sync.run(shutdown).await })
    }

    async fn run(&self, shutdown: CancellationToken) {
        let mut state = SyncState::Idle;
        let mut round_started = Instant::now();
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            metrics::get()
                .sync_state_transitions
                .with_label_values(&[state.name()])
                .inc();
            state = match state {
                SyncState::Idle => {
                    round_started = Instant::now();
                    match self.idle(&shutdown).await {
                        Some(next) => next,
                        None => return,
                    }
                }
                SyncState::CollectingAvailabilityResponses => {
                    self.collect_availability_responses(&shutdown).await
                }
                SyncState::FinishedCar(responses) => self.choose_source(responses),
                SyncState::WaitingForChunks(source) => self.wait_for_chunks(source).await,
                SyncState::ProcessingBlocks(response) => {
                    let next = self.process_blocks(response).await;
                    metrics::get()
                        .sync_round_duration
                        .observe(round_started.elapsed().as_secs_f64());
                    next
                }
            };
        }
    }

    /// Wait for the no-commit interval. Any observed commit resets the
    /// timer; cancellation returns `None`.
    async fn idle(&self, shutdown: &CancellationToken) -> Option<SyncState> {
        let mut tip_watch = self.storage.tip_watch();
        let interval = self.storage.config().sync_no_commit_interval;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(interval) => {
                    debug!("no commits observed, probing for newer blocks");
                    return Some(SyncState::CollectingAvailabilityResponses);
                }
                changed = tip_watch.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    // A commit happened; stay idle with a fresh timer.
                }
            }
        }
    }

    async fn collect_availability_responses(&self, shutdown: &CancellationToken) -> SyncState {
        let mut responses_rx = self.responses_rx.lock().await;
        // Stale responses from a previous round are not ours to consider.
        while responses_rx.try_recv().is_ok() {}

        let tip = self.storage.tip_height();
        let batch = self.storage.config().sync_batch_size as u64;
        let request = BlockAvailabilityRequestMessage {
            sender: self.signer.node_address(),
            first_block_requested: tip.next(),
            last_block_requested: BlockHeight(tip.0 + batch),
            last_committed_block_height: tip,
        };
        let header = GossipHeader::broadcast(
            Topic::BlockSync,
            BLOCK_SYNC_AVAILABILITY_REQUEST,
            self.storage.config().virtual_chain_id,
        );
        let payloads = encode_message(
            &header,
            BlockSyncMessage::AvailabilityRequest(request).to_payloads(),
        );
        if let Err(e) = self
            .transport
            .send(RecipientMode::Broadcast, &[], payloads)
            .await
        {
            warn!(error = %e, "availability request broadcast failed");
            return SyncState::Idle;
        }

        let deadline = Instant::now() + self.storage.config().sync_collect_responses_timeout;
        let mut responses = Vec::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return SyncState::Idle,
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(count = responses.len(), "finished collecting availability responses");
                    return SyncState::FinishedCar(responses);
                }
                response = responses_rx.recv() => {
                    match response {
                        Some(response) => responses.push(response),
                        None => return SyncState::Idle,
                    }
                }
            }
        }
    }

    /// Pick the responder claiming the highest last-committed height above
    /// our tip, skipping non-members and bad signatures.
    fn choose_source(&self, responses: Vec<BlockAvailabilityResponseMessage>) -> SyncState {
        let tip = self.storage.tip_height();
        let topology = self.storage.topology();
        let best = responses
            .into_iter()
            .filter(|response| {
                let sender = response.sender.sender_node_address;
                let Some(key) = topology.public_key_of(sender) else {
                    warn!(sender = ?sender, "availability response from non-member");
                    return false;
                };
                let digest = envelope_digest(
                    Topic::BlockSync,
                    BLOCK_SYNC_AVAILABILITY_RESPONSE,
                    sync_range_content_digest(
                        response.first_available_block,
                        response.last_available_block,
                        response.last_committed_block_height,
                    ),
                );
                if !key.verify(&digest, &response.sender.signature) {
                    warn!(sender = ?sender, "availability response with bad signature");
                    return false;
                }
                response.last_committed_block_height > tip
            })
            .max_by_key(|response| response.last_committed_block_height);

        match best {
            Some(response) => {
                info!(
                    source = ?response.sender.sender_node_address,
                    source_height = %response.last_committed_block_height,
                    our_height = %tip,
                    "sync source chosen"
                );
                SyncState::WaitingForChunks(response.sender.sender_node_address)
            }
            None => SyncState::Idle,
        }
    }

    async fn wait_for_chunks(&self, source: NodeAddress) -> SyncState {
        let mut chunks_rx = self.chunks_rx.lock().await;
        while chunks_rx.try_recv().is_ok() {}

        let tip = self.storage.tip_height();
        let batch = self.storage.config().sync_batch_size as u64;
        let request = BlockSyncRequestMessage {
            sender: self.signer.node_address(),
            first_block_requested: tip.next(),
            last_block_requested: BlockHeight(tip.0 + batch),
        };
        let header = GossipHeader::to_list(
            Topic::BlockSync,
            BLOCK_SYNC_CHUNK_REQUEST,
            self.storage.config().virtual_chain_id,
            vec![source],
        );
        let payloads =
            encode_message(&header, BlockSyncMessage::ChunkRequest(request).to_payloads());
        if let Err(e) = self
            .transport
            .send(RecipientMode::List, &[source], payloads)
            .await
        {
            warn!(error = %e, "chunk request send failed");
            return SyncState::Idle;
        }

        let deadline = Instant::now() + self.storage.config().sync_collect_chunks_timeout;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(source = ?source, "chunk response timed out");
                    return SyncState::Idle;
                }
                response = chunks_rx.recv() => {
                    match response {
                        Some(response) if response.sender == source => {
                            return SyncState::ProcessingBlocks(response);
                        }
                        Some(other) => {
                            debug!(sender = ?other.sender, "ignoring chunk from unchosen source");
                        }
                        None => return SyncState::Idle,
                    }
                }
            }
        }
    }

    /// Validate and commit each chunked block in order, stopping at the
    /// first failure. Live consensus commits may interleave; both paths go
    /// through `commit_block`, so an already-present block is idempotent.
    async fn process_blocks(&self, response: BlockSyncResponseMessage) -> SyncState {
        info!(
            count = response.block_pairs.len(),
            first = %response.first_block,
            last = %response.last_block,
            sender = ?response.sender,
            "committing blocks from sync"
        );
        for pair in response.block_pairs {
            let height = pair.height();
            if let Err(e) = self.storage.validate_block_for_commit(&pair) {
                warn!(%height, error = %e, "sync block failed validation");
                break;
            }
            match self.storage.commit_block(pair).await {
                Ok(_) => metrics::get().sync_blocks_committed.inc(),
                Err(e) => {
                    warn!(%height, error = %e, "sync block failed to commit");
                    break;
                }
            }
        }
        SyncState::CollectingAvailabilityResponses
    }

    /// Source side: answer an availability request if we hold anything the
    /// petitioner lacks.
    async fn serve_availability_request(&self, request: BlockAvailabilityRequestMessage) {
        let tip = self.storage.tip_height();
        if tip < request.first_block_requested {
            return;
        }
        let content = sync_range_content_digest(BlockHeight(1), tip, tip);
        let digest = envelope_digest(Topic::BlockSync, BLOCK_SYNC_AVAILABILITY_RESPONSE, content);
        let signature = match self.signer.sign(&digest).await {
            Ok(signature) => signature,
            Err(e) => {
                warn!(error = %e, "could not sign availability response");
                return;
            }
        };
        let response = BlockAvailabilityResponseMessage {
            first_available_block: BlockHeight(1),
            last_available_block: tip,
            last_committed_block_height: tip,
            sender: SenderSignature {
                sender_node_address: self.signer.node_address(),
                signature,
            },
        };
        let header = GossipHeader::to_list(
            Topic::BlockSync,
            BLOCK_SYNC_AVAILABILITY_RESPONSE,
            self.storage.config().virtual_chain_id,
            vec![request.sender],
        );
        let payloads = encode_message(
            &header,
            BlockSyncMessage::AvailabilityResponse(response).to_payloads(),
        );
        let _ = self
            .transport
            .send(RecipientMode::List, &[request.sender], payloads)
            .await;
    }

    /// Source side: serve a chunk from persisted history.
    async fn serve_chunk_request(&self, request: BlockSyncRequestMessage) {
        let blocks = match self
            .storage
            .blocks_for_sync(request.first_block_requested, request.last_block_requested)
        {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(error = %e, "could not read blocks for sync chunk");
                return;
            }
        };
        if blocks.is_empty() {
            return;
        }
        let response = BlockSyncResponseMessage {
            sender: self.signer.node_address(),
            first_block: blocks[0].height(),
            last_block: blocks[blocks.len() - 1].height(),
            last_committed_block_height: self.storage.tip_height(),
            block_pairs: blocks,
        };
        let header = GossipHeader::to_list(
            Topic::BlockSync,
            BLOCK_SYNC_CHUNK_RESPONSE,
            self.storage.config().virtual_chain_id,
            vec![request.sender],
        );
        let payloads = encode_message(&header, response.to_payloads());
        if self
            .transport
            .send(RecipientMode::List, &[request.sender], payloads)
            .await
            .is_ok()
        {
            metrics::get().sync_chunks_served.inc();
        }
    }
}

/// Routes BLOCK_SYNC gossip: requests to the source-side handlers,
/// responses into the petitioner's conduits.
struct BlockSyncListener {
    sync: Arc<BlockSync>,
}

#[async_trait]
impl GossipListener for BlockSyncListener {
    async fn on_message(&self, header: GossipHeader, payloads: Vec<Vec<u8>>) {
        if header.virtual_chain_id != self.sync.storage.config().virtual_chain_id {
            warn!(chain = %header.virtual_chain_id, "dropping sync message for foreign chain");
            return;
        }
        let message = match BlockSyncMessage::decode(header.subtype, &payloads) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "undecodable block-sync message");
                return;
            }
        };
        match message {
            BlockSyncMessage::AvailabilityRequest(request) => {
                self.sync.serve_availability_request(request).await;
            }
            BlockSyncMessage::ChunkRequest(request) => {
                self.sync.serve_chunk_request(request).await;
            }
            BlockSyncMessage::AvailabilityResponse(response) => {
                // Full conduit means a round is already saturated; drop.
                let _ = self.sync.responses_tx.try_send(response);
            }
            BlockSyncMessage::ChunkResponse(response) => {
                let _ = self.sync.chunks_tx.try_send(response);
            }
        }
    }
}
