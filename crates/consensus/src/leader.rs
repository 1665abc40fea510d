//! The leader role: propose, broadcast, collect, close, advance.

use crate::metrics;
use crate::service::BenchmarkConsensus;
use concord_messages::{BenchmarkConsensusMessage, CommittedMessage};
use concord_types::{
    BlockPair, BlockProof, NodeAddress, ProofSignature, Sha256, Signature, TimestampNano,
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) async fn run(service: &BenchmarkConsensus, shutdown: CancellationToken) {
    let mut inbox = service.inbox_rx.lock().await;
    let mut tip_watch = service.storage.tip_watch();

    'rounds: loop {
        if shutdown.is_cancelled() {
            return;
        }
        let height = service.storage.tip_height().next();
        metrics::get().rounds_started.inc();
        metrics::get().current_round_height.set(height.0 as f64);

        // Propose: ask the context for the next block pair. Failures back
        // off and retry at the same height.
        let pair = loop {
            match propose(service).await {
                Ok(pair) => break pair,
                Err(e) => {
                    metrics::get().proposal_failures.inc();
                    warn!(%height, error = %e, "proposal failed, backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(service.config.proposal_retry_backoff) => {}
                    }
                    if service.storage.tip_height().next() != height {
                        // Sync advanced us past this height meanwhile.
                        continue 'rounds;
                    }
                }
            }
        };
        let block_ref = pair.block_ref();
        info!(
            %height,
            transactions = pair.transactions_block.signed_transactions.len(),
            "proposal ready, broadcasting commit"
        );
        if !service.send_commit(&pair).await {
            continue 'rounds;
        }

        // Collect confirmations from distinct members until quorum.
        let mut confirmations: HashMap<NodeAddress, Signature> = HashMap::new();
        let quorum = service.storage.topology().quorum();
        loop {
            if confirmations.len() >= quorum {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(service.config.round_retry_interval) => {
                    metrics::get().round_retries.inc();
                    debug!(%height, confirmations = confirmations.len(), "round retry, rebroadcasting commit");
                    service.send_commit(&pair).await;
                }
                changed = tip_watch.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if service.storage.tip_height() >= height {
                        // Someone else's path (block sync) brought us to or
                        // past this height; abandon the round.
                        continue 'rounds;
                    }
                }
                message = inbox.recv() => {
                    let Some(message) = message else { return };
                    if let BenchmarkConsensusMessage::Committed(committed) = message {
                        handle_confirmation(service, &mut confirmations, height.0, &block_ref, committed);
                    }
                }
            }
        }

        // Quorum: assemble the proof from the collected signatures and
        // commit locally. Block storage re-verifies everything.
        let mut proven = pair.clone();
        proven.proof = BlockProof {
            block_ref,
            signatures: confirmations
                .iter()
                .map(|(signer, signature)| ProofSignature {
                    signer: *signer,
                    signature: *signature,
                })
                .collect(),
        };
        match service.storage.commit_block(proven.clone()).await {
            Ok(tip) => {
                metrics::get().blocks_closed.inc();
                info!(%height, %tip, "block closed with quorum proof");
                // Re-broadcast the proven pair so validators commit too.
                service.send_commit(&proven).await;
            }
            Err(e) => {
                warn!(%height, error = %e, "closed block failed to commit locally");
            }
        }
    }
}

fn handle_confirmation(
    service: &BenchmarkConsensus,
    confirmations: &mut HashMap<NodeAddress, Signature>,
    round_height: u64,
    round_block_ref: &Sha256,
    committed: CommittedMessage,
) {
    let sender = committed.sender.sender_node_address;
    if committed.block_height.0 != round_height {
        // Stale-height replies measure lagging peers; they never count
        // toward the running round.
        debug!(claimed = %committed.block_height, round = round_height, peer = ?sender, "confirmation for another height");
        return;
    }
    if committed.block_ref != *round_block_ref {
        metrics::get().invalid_messages.inc();
        warn!(peer = ?sender, "confirmation for a different block-ref");
        return;
    }
    if !service.verify_committed_sender(&committed.sender, round_block_ref) {
        metrics::get().invalid_messages.inc();
        warn!(peer = ?sender, "confirmation with bad signature or non-member sender");
        return;
    }
    if confirmations
        .insert(sender, committed.sender.signature)
        .is_none()
    {
        metrics::get().confirmations_received.inc();
        debug!(peer = ?sender, count = confirmations.len(), "confirmation accepted");
    }
}

async fn propose(
    service: &BenchmarkConsensus,
) -> Result<BlockPair, concord_context::ContextError> {
    let height = service.storage.tip_height().next();
    let prev = service.storage.last_committed_block();
    let (prev_tx_hash, prev_rx_hash, prev_timestamp) = match prev.as_ref() {
        Some(prev) => (
            prev.transactions_block.hash(),
            prev.results_block.hash(),
            prev.timestamp(),
        ),
        None => (Sha256::ZERO, Sha256::ZERO, TimestampNano(0)),
    };

    let transactions_block = service
        .context
        .request_new_transactions_block(height, prev_tx_hash, prev_timestamp)
        .await?;
    let results_block = service
        .context
        .request_new_results_block(height, prev_rx_hash, &transactions_block)
        .await?;
    Ok(BlockPair {
        transactions_block,
        results_block,
        proof: BlockProof::default(),
    })
}
