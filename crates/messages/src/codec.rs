//! Encoding and decoding between typed messages and payload vectors.

use crate::header::GossipHeader;
use thiserror::Error;

/// Errors from payload-vector decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message has no header payload")]
    MissingHeader,
    #[error("expected {expected} payloads after the header, got {actual}")]
    WrongPayloadCount { expected: usize, actual: usize },
    #[error("unknown subtype {subtype} for topic {topic}")]
    UnknownSubtype { topic: &'static str, subtype: u16 },
    #[error("sbor decode error: {0}")]
    Decode(String),
}

pub(crate) fn decode_payload<T: sbor::prelude::BasicDecode>(
    payload: &[u8],
) -> Result<T, CodecError> {
    sbor::basic_decode(payload).map_err(|e| CodecError::Decode(format!("{e:?}")))
}

pub(crate) fn encode_payload<T: sbor::prelude::BasicEncode>(value: &T) -> Vec<u8> {
    sbor::basic_encode(value).expect("message should be encodable")
}

/// Prefix `body_payloads` with the encoded header, producing the full
/// payload vector handed to the transport.
pub fn encode_message(header: &GossipHeader, body_payloads: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut payloads = Vec::with_capacity(1 + body_payloads.len());
    payloads.push(encode_payload(header));
    payloads.extend(body_payloads);
    payloads
}

/// Split an incoming payload vector into its header and body payloads.
pub fn decode_header(payloads: &[Vec<u8>]) -> Result<(GossipHeader, &[Vec<u8>]), CodecError> {
    let (first, rest) = payloads.split_first().ok_or(CodecError::MissingHeader)?;
    let header = decode_payload::<GossipHeader>(first)?;
    Ok((header, rest))
}

pub(crate) fn expect_payload_count(payloads: &[Vec<u8>], expected: usize) -> Result<(), CodecError> {
    if payloads.len() != expected {
        return Err(CodecError::WrongPayloadCount {
            expected,
            actual: payloads.len(),
        });
    }
    Ok(())
}

pub(crate) fn expect_at_least(payloads: &[Vec<u8>], minimum: usize) -> Result<(), CodecError> {
    if payloads.len() < minimum {
        return Err(CodecError::WrongPayloadCount {
            expected: minimum,
            actual: payloads.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::Topic;
    use concord_types::VirtualChainId;

    #[test]
    fn header_round_trip() {
        let header = GossipHeader::broadcast(Topic::BlockSync, 2, VirtualChainId(42));
        let payloads = encode_message(&header, vec![b"body".to_vec()]);
        assert_eq!(payloads.len(), 2);

        let (decoded, body) = decode_header(&payloads).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, &[b"body".to_vec()]);
    }

    #[test]
    fn empty_vector_is_rejected() {
        assert!(matches!(
            decode_header(&[]),
            Err(CodecError::MissingHeader)
        ));
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let payloads = vec![vec![0xFF, 0x00, 0x13]];
        assert!(matches!(
            decode_header(&payloads),
            Err(CodecError::Decode(_))
        ));
    }
}
