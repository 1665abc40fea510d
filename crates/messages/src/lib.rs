//! Gossip message types and their payload-vector codec.
//!
//! Every gossip message is a vector of byte payloads. Payload 0 is always
//! the SBOR-encoded [`GossipHeader`]; the remaining payloads are
//! topic-specific. Message type is determined by the header's topic and
//! subtype, never by sniffing payload contents.

mod codec;
mod consensus;
mod header;
mod relay;
mod sync;
mod topics;

pub use codec::{decode_header, encode_message, CodecError};
pub use consensus::{
    BenchmarkConsensusMessage, CommitMessage, CommittedMessage, BENCHMARK_CONSENSUS_COMMIT,
    BENCHMARK_CONSENSUS_COMMITTED,
};
pub use header::{GossipHeader, RecipientMode, SenderSignature};
pub use relay::{
    forwarded_transactions_content_digest, ForwardedTransactionsMessage,
    TRANSACTION_RELAY_FORWARDED,
};
pub use sync::{
    sync_range_content_digest, BlockAvailabilityRequestMessage, BlockAvailabilityResponseMessage,
    BlockSyncMessage, BlockSyncRequestMessage, BlockSyncResponseMessage, BLOCK_SYNC_AVAILABILITY_REQUEST,
    BLOCK_SYNC_AVAILABILITY_RESPONSE, BLOCK_SYNC_CHUNK_REQUEST, BLOCK_SYNC_CHUNK_RESPONSE,
};
pub use topics::Topic;

use concord_types::Sha256;

/// Digest every gossip envelope signature is made over:
/// `sha256(topic || subtype || content_hash)`.
pub fn envelope_digest(topic: Topic, subtype: u16, content_hash: Sha256) -> Sha256 {
    let mut bytes = Vec::with_capacity(4 + 32);
    bytes.extend_from_slice(&topic.as_u16().to_le_bytes());
    bytes.extend_from_slice(&subtype.to_le_bytes());
    bytes.extend_from_slice(content_hash.as_bytes());
    Sha256::of(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_digest_separates_topics_and_subtypes() {
        let content = Sha256::of(b"content");
        let a = envelope_digest(Topic::TransactionRelay, 1, content);
        let b = envelope_digest(Topic::BlockSync, 1, content);
        let c = envelope_digest(Topic::TransactionRelay, 2, content);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
