//! Benchmark-consensus messages: the leader's commit broadcast and the
//! validators' confirmations.

use crate::codec::{decode_payload, encode_payload, expect_payload_count, CodecError};
use crate::header::SenderSignature;
use concord_types::{BlockHeight, BlockPair, Sha256};
use sbor::prelude::BasicSbor;

pub const BENCHMARK_CONSENSUS_COMMIT: u16 = 1;
pub const BENCHMARK_CONSENSUS_COMMITTED: u16 = 2;

/// Broadcast by the leader: a proposed (or, once quorum was reached, a
/// proven) block pair. The sender signature is over the envelope digest of
/// the pair's block-ref.
///
/// On the wire: sender payload, block-pair payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub sender: SenderSignature,
    pub block_pair: BlockPair,
}

impl CommitMessage {
    pub fn to_payloads(&self) -> Vec<Vec<u8>> {
        vec![encode_payload(&self.sender), encode_payload(&self.block_pair)]
    }

    pub fn from_payloads(payloads: &[Vec<u8>]) -> Result<Self, CodecError> {
        expect_payload_count(payloads, 2)?;
        Ok(Self {
            sender: decode_payload(&payloads[0])?,
            block_pair: decode_payload(&payloads[1])?,
        })
    }
}

/// A validator's confirmation. `block_ref` is the digest the validator
/// signed: the block-ref of the block pair at `block_height` as the
/// validator sees it. For stale heights the validator answers with its own
/// last committed height and that block's ref, which lets the leader
/// measure how far each peer has progressed.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct CommittedMessage {
    pub block_height: BlockHeight,
    pub block_ref: Sha256,
    pub sender: SenderSignature,
}

impl CommittedMessage {
    pub fn to_payloads(&self) -> Vec<Vec<u8>> {
        vec![encode_payload(self)]
    }

    pub fn from_payloads(payloads: &[Vec<u8>]) -> Result<Self, CodecError> {
        expect_payload_count(payloads, 1)?;
        decode_payload(&payloads[0])
    }
}

/// A decoded benchmark-consensus message, keyed by subtype.
#[derive(Debug, Clone)]
pub enum BenchmarkConsensusMessage {
    Commit(CommitMessage),
    Committed(CommittedMessage),
}

impl BenchmarkConsensusMessage {
    pub fn decode(subtype: u16, payloads: &[Vec<u8>]) -> Result<Self, CodecError> {
        match subtype {
            BENCHMARK_CONSENSUS_COMMIT => {
                Ok(Self::Commit(CommitMessage::from_payloads(payloads)?))
            }
            BENCHMARK_CONSENSUS_COMMITTED => {
                Ok(Self::Committed(CommittedMessage::from_payloads(payloads)?))
            }
            other => Err(CodecError::UnknownSubtype {
                topic: "benchmark_consensus",
                subtype: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::Signature;

    #[test]
    fn committed_round_trip() {
        let message = CommittedMessage {
            block_height: BlockHeight(7),
            block_ref: Sha256::of(b"ref"),
            sender: SenderSignature {
                sender_node_address: concord_types::NodeAddress([1u8; 20]),
                signature: Signature([2u8; 64]),
            },
        };
        let decoded = CommittedMessage::from_payloads(&message.to_payloads()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn unknown_subtype_is_rejected() {
        assert!(matches!(
            BenchmarkConsensusMessage::decode(9, &[]),
            Err(CodecError::UnknownSubtype { subtype: 9, .. })
        ));
    }
}
