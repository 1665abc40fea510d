//! Block-sync messages: availability discovery and chunked block transfer.

use crate::codec::{decode_payload, encode_payload, expect_at_least, expect_payload_count, CodecError};
use crate::header::SenderSignature;
use concord_types::{BlockHeight, BlockPair, NodeAddress, Sha256};
use sbor::prelude::BasicSbor;

pub const BLOCK_SYNC_AVAILABILITY_REQUEST: u16 = 1;
pub const BLOCK_SYNC_AVAILABILITY_RESPONSE: u16 = 2;
pub const BLOCK_SYNC_CHUNK_REQUEST: u16 = 3;
pub const BLOCK_SYNC_CHUNK_RESPONSE: u16 = 4;

/// Broadcast by a petitioner that suspects it is behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct BlockAvailabilityRequestMessage {
    pub sender: NodeAddress,
    pub first_block_requested: BlockHeight,
    pub last_block_requested: BlockHeight,
    pub last_committed_block_height: BlockHeight,
}

/// A source answering with the range it can serve. The signature is over
/// the envelope digest of the advertised range.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BlockAvailabilityResponseMessage {
    pub first_available_block: BlockHeight,
    pub last_available_block: BlockHeight,
    pub last_committed_block_height: BlockHeight,
    pub sender: SenderSignature,
}

/// Sent by the petitioner to its chosen source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct BlockSyncRequestMessage {
    pub sender: NodeAddress,
    pub first_block_requested: BlockHeight,
    pub last_block_requested: BlockHeight,
}

/// A chunk of block pairs served from the source's persisted history.
///
/// On the wire: range payload, then one payload per block pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSyncResponseMessage {
    pub sender: NodeAddress,
    pub first_block: BlockHeight,
    pub last_block: BlockHeight,
    pub last_committed_block_height: BlockHeight,
    pub block_pairs: Vec<BlockPair>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
struct ChunkRange {
    sender: NodeAddress,
    first_block: BlockHeight,
    last_block: BlockHeight,
    last_committed_block_height: BlockHeight,
}

impl BlockSyncResponseMessage {
    pub fn to_payloads(&self) -> Vec<Vec<u8>> {
        let range = ChunkRange {
            sender: self.sender,
            first_block: self.first_block,
            last_block: self.last_block,
            last_committed_block_height: self.last_committed_block_height,
        };
        let mut payloads = Vec::with_capacity(1 + self.block_pairs.len());
        payloads.push(encode_payload(&range));
        for pair in &self.block_pairs {
            payloads.push(encode_payload(pair));
        }
        payloads
    }

    pub fn from_payloads(payloads: &[Vec<u8>]) -> Result<Self, CodecError> {
        expect_at_least(payloads, 1)?;
        let range = decode_payload::<ChunkRange>(&payloads[0])?;
        let block_pairs = payloads[1..]
            .iter()
            .map(|p| decode_payload::<BlockPair>(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sender: range.sender,
            first_block: range.first_block,
            last_block: range.last_block,
            last_committed_block_height: range.last_committed_block_height,
            block_pairs,
        })
    }
}

/// Content digest for availability responses: the advertised range.
pub fn sync_range_content_digest(
    first: BlockHeight,
    last: BlockHeight,
    last_committed: BlockHeight,
) -> Sha256 {
    Sha256::of_encodable(&(first, last, last_committed))
}

/// A decoded block-sync message, keyed by subtype.
#[derive(Debug, Clone)]
pub enum BlockSyncMessage {
    AvailabilityRequest(BlockAvailabilityRequestMessage),
    AvailabilityResponse(BlockAvailabilityResponseMessage),
    ChunkRequest(BlockSyncRequestMessage),
    ChunkResponse(BlockSyncResponseMessage),
}

impl BlockSyncMessage {
    pub fn decode(subtype: u16, payloads: &[Vec<u8>]) -> Result<Self, CodecError> {
        match subtype {
            BLOCK_SYNC_AVAILABILITY_REQUEST => {
                expect_payload_count(payloads, 1)?;
                Ok(Self::AvailabilityRequest(decode_payload(&payloads[0])?))
            }
            BLOCK_SYNC_AVAILABILITY_RESPONSE => {
                expect_payload_count(payloads, 1)?;
                Ok(Self::AvailabilityResponse(decode_payload(&payloads[0])?))
            }
            BLOCK_SYNC_CHUNK_REQUEST => {
                expect_payload_count(payloads, 1)?;
                Ok(Self::ChunkRequest(decode_payload(&payloads[0])?))
            }
            BLOCK_SYNC_CHUNK_RESPONSE => Ok(Self::ChunkResponse(
                BlockSyncResponseMessage::from_payloads(payloads)?,
            )),
            other => Err(CodecError::UnknownSubtype {
                topic: "block_sync",
                subtype: other,
            }),
        }
    }

    /// Single-payload encoding for the three fixed-shape messages.
    pub fn to_payloads(&self) -> Vec<Vec<u8>> {
        match self {
            Self::AvailabilityRequest(m) => vec![encode_payload(m)],
            Self::AvailabilityResponse(m) => vec![encode_payload(m)],
            Self::ChunkRequest(m) => vec![encode_payload(m)],
            Self::ChunkResponse(m) => m.to_payloads(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_request_round_trip() {
        let message = BlockAvailabilityRequestMessage {
            sender: NodeAddress([3u8; 20]),
            first_block_requested: BlockHeight(11),
            last_block_requested: BlockHeight(14),
            last_committed_block_height: BlockHeight(10),
        };
        let payloads = BlockSyncMessage::AvailabilityRequest(message).to_payloads();
        match BlockSyncMessage::decode(BLOCK_SYNC_AVAILABILITY_REQUEST, &payloads).unwrap() {
            BlockSyncMessage::AvailabilityRequest(decoded) => assert_eq!(decoded, message),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn chunk_response_with_no_blocks_round_trips() {
        let message = BlockSyncResponseMessage {
            sender: NodeAddress([1u8; 20]),
            first_block: BlockHeight(5),
            last_block: BlockHeight(4),
            last_committed_block_height: BlockHeight(4),
            block_pairs: vec![],
        };
        let decoded = BlockSyncResponseMessage::from_payloads(&message.to_payloads()).unwrap();
        assert_eq!(decoded, message);
    }
}
