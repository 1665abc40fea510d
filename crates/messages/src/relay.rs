//! Transaction relay: forwarding admitted transactions to the federation.

use crate::codec::{decode_payload, encode_payload, expect_at_least, CodecError};
use crate::header::SenderSignature;
use concord_types::{Sha256, SignedTransaction};

/// Subtype for the only transaction-relay message.
pub const TRANSACTION_RELAY_FORWARDED: u16 = 1;

/// A batch of transactions forwarded by the node that admitted them.
///
/// On the wire: one payload for the sender signature, then one payload per
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedTransactionsMessage {
    pub sender: SenderSignature,
    pub signed_transactions: Vec<SignedTransaction>,
}

impl ForwardedTransactionsMessage {
    pub fn to_payloads(&self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::with_capacity(1 + self.signed_transactions.len());
        payloads.push(encode_payload(&self.sender));
        for tx in &self.signed_transactions {
            payloads.push(encode_payload(tx));
        }
        payloads
    }

    pub fn from_payloads(payloads: &[Vec<u8>]) -> Result<Self, CodecError> {
        expect_at_least(payloads, 1)?;
        let sender = decode_payload::<SenderSignature>(&payloads[0])?;
        let signed_transactions = payloads[1..]
            .iter()
            .map(|p| decode_payload::<SignedTransaction>(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sender,
            signed_transactions,
        })
    }
}

/// Content digest of a forwarded batch: the hash of the concatenated
/// transaction hashes, in batch order.
pub fn forwarded_transactions_content_digest(transactions: &[SignedTransaction]) -> Sha256 {
    let hashes: Vec<Sha256> = transactions.iter().map(|tx| tx.hash()).collect();
    Sha256::of_digests(hashes.iter())
}
