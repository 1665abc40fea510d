//! SHA-256 content digests.

use sbor::prelude::BasicSbor;
use sha2::Digest;
use std::fmt;

/// A 32-byte SHA-256 content digest.
///
/// Equality and ordering are bytewise, which makes digests usable as map
/// keys and as Merkle tree leaves without further conversion.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct Sha256(pub [u8; 32]);

impl Sha256 {
    /// The all-zero digest, used as the genesis predecessor hash and as the
    /// root of an empty Merkle tree.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Hash raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Hash the canonical SBOR encoding of a value.
    pub fn of_encodable<T: sbor::prelude::BasicEncode>(value: &T) -> Self {
        let bytes = sbor::basic_encode(value).expect("value should be encodable");
        Self::of(&bytes)
    }

    /// Hash the concatenation of several digests, in order.
    pub fn of_digests<'a>(digests: impl IntoIterator<Item = &'a Sha256>) -> Self {
        let mut hasher = sha2::Sha256::new();
        for digest in digests {
            hasher.update(digest.0);
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a digest from a 32-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncated form keeps log lines readable.
        write!(f, "{}..", hex::encode(&self.0[..6]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(Sha256::of(b"concord"), Sha256::of(b"concord"));
        assert_ne!(Sha256::of(b"concord"), Sha256::of(b"discord"));
    }

    #[test]
    fn from_slice_rejects_wrong_lengths() {
        assert!(Sha256::from_slice(&[0u8; 31]).is_none());
        assert!(Sha256::from_slice(&[0u8; 33]).is_none());
        assert!(Sha256::from_slice(&[7u8; 32]).is_some());
    }

    #[test]
    fn concatenated_digest_matches_manual_hash() {
        let a = Sha256::of(b"a");
        let b = Sha256::of(b"b");
        let mut concat = Vec::new();
        concat.extend_from_slice(a.as_bytes());
        concat.extend_from_slice(b.as_bytes());
        assert_eq!(Sha256::of_digests([&a, &b]), Sha256::of(&concat));
    }
}
