//! The validator role: validate Commit messages, confirm, commit on proof.

use crate::metrics;
use crate::service::BenchmarkConsensus;
use concord_context::{ResultsBlockValidationInput, TransactionsBlockValidationInput};
use concord_messages::{
    encode_message, BenchmarkConsensusMessage, CommitMessage, CommittedMessage, GossipHeader,
    RecipientMode, SenderSignature, Topic, BENCHMARK_CONSENSUS_COMMITTED,
};
use concord_gossip::Transport as _;
use concord_signer::Signer as _;
use concord_types::{BlockHeight, Sha256, TimestampNano};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) async fn run(service: &BenchmarkConsensus, shutdown: CancellationToken) {
    let mut inbox = service.inbox_rx.lock().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            message = inbox.recv() => {
                let Some(message) = message else { return };
                if let BenchmarkConsensusMessage::Commit(commit) = message {
                    handle_commit(service, commit).await;
                }
            }
        }
    }
}

async fn handle_commit(service: &BenchmarkConsensus, commit: CommitMessage) {
    if !service.verify_commit_sender(&commit) {
        metrics::get().invalid_messages.inc();
        warn!("commit message not from the designated leader, dropped");
        return;
    }

    let pair = commit.block_pair;
    let height = pair.height();
    let (last_committed, _) = service.storage.get_last_committed_block_info();

    if height <= last_committed {
        // Help the leader measure the cluster: answer with where we are.
        reply_with_last_committed(service).await;
        return;
    }
    if height > last_committed.next() {
        // Too far ahead; block sync will close the gap.
        debug!(%height, %last_committed, "commit ahead of our tip, relying on sync");
        return;
    }

    // height == last_committed + 1: validate the proposal in full.
    let prev = service.storage.last_committed_block();
    let (prev_tx_hash, prev_rx_hash, prev_timestamp) = match prev.as_ref() {
        Some(prev) => (
            prev.transactions_block.hash(),
            prev.results_block.hash(),
            prev.timestamp(),
        ),
        None => (Sha256::ZERO, Sha256::ZERO, TimestampNano(0)),
    };

    let tx_input = TransactionsBlockValidationInput {
        block_height: height,
        prev_block_hash: prev_tx_hash,
        prev_block_timestamp: prev_timestamp,
        transactions_block: pair.transactions_block.clone(),
    };
    if let Err(e) = service.context.validate_transactions_block(&tx_input).await {
        // An invalid proposal gets no reply; the leader's retry timer
        // covers the silence.
        warn!(%height, error = %e, "transactions block failed validation, not confirming");
        return;
    }
    let rx_input = ResultsBlockValidationInput {
        block_height: height,
        prev_block_hash: prev_rx_hash,
        transactions_block: pair.transactions_block.clone(),
        results_block: pair.results_block.clone(),
    };
    if let Err(e) = service.context.validate_results_block(&rx_input).await {
        warn!(%height, error = %e, "results block failed validation, not confirming");
        return;
    }

    // Commit locally once the pair carries a quorum proof (the leader's
    // re-broadcast after closing the round).
    if !pair.proof.is_empty() {
        match service.storage.commit_block(pair.clone()).await {
            Ok(tip) => debug!(%tip, "proven block committed"),
            Err(e) => {
                warn!(%height, error = %e, "proven block failed to commit");
                return;
            }
        }
    }

    reply_committed(service, height, pair.block_ref()).await;
}

/// Confirm `height` by signing its block-ref. The signature is exactly the
/// entry the leader will place in the block proof.
async fn reply_committed(service: &BenchmarkConsensus, height: BlockHeight, block_ref: Sha256) {
    let signature = match service.signer.sign(&block_ref).await {
        Ok(signature) => signature,
        Err(e) => {
            warn!(error = %e, "could not sign confirmation");
            return;
        }
    };
    let message = CommittedMessage {
        block_height: height,
        block_ref,
        sender: SenderSignature {
            sender_node_address: service.signer.node_address(),
            signature,
        },
    };
    let leader = service.storage.topology().leader();
    let header = GossipHeader::to_list(
        Topic::BenchmarkConsensus,
        BENCHMARK_CONSENSUS_COMMITTED,
        service.storage.config().virtual_chain_id,
        vec![leader],
    );
    let payloads = encode_message(&header, message.to_payloads());
    if service
        .transport
        .send(RecipientMode::List, &[leader], payloads)
        .await
        .is_ok()
    {
        metrics::get().validator_replies.inc();
    }
}

/// For stale Commit messages: reply with our last committed height and
/// that block's ref so the leader can see how far we are.
async fn reply_with_last_committed(service: &BenchmarkConsensus) {
    let Some(last) = service.storage.last_committed_block() else {
        return;
    };
    reply_committed(service, last.height(), last.block_ref()).await;
}
