//! Scalar identifiers: heights, timestamps, protocol and chain ids,
//! federation member addresses.

use crate::crypto::PublicKey;
use crate::hash::Sha256;
use sbor::prelude::BasicSbor;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The protocol version this node speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion(1);

/// Monotonic block counter. Height 0 is the implicit genesis predecessor;
/// the first real block is height 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct BlockHeight(pub u64);

impl BlockHeight {
    pub const GENESIS: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The preceding height, or `None` at genesis.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }

    pub fn is_genesis(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct TimestampNano(pub u64);

impl TimestampNano {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos();
        Self(nanos as u64)
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_nanos() as u64))
    }

    pub fn saturating_sub(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.as_nanos() as u64))
    }
}

impl fmt::Display for TimestampNano {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire/consensus protocol version carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct ProtocolVersion(pub u32);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the logical chain; gossip across mismatched ids is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct VirtualChainId(pub u32);

impl fmt::Display for VirtualChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte federation member identity, derived from the member's public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct NodeAddress(pub [u8; 20]);

impl NodeAddress {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = Sha256::of(public_key.as_bytes());
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest.as_bytes()[..20]);
        Self(address)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn height_arithmetic() {
        assert_eq!(BlockHeight::GENESIS.next(), BlockHeight(1));
        assert_eq!(BlockHeight(5).prev(), Some(BlockHeight(4)));
        assert_eq!(BlockHeight::GENESIS.prev(), None);
    }

    #[test]
    fn address_is_stable_per_key() {
        let kp = KeyPair::from_seed([9u8; 32]);
        let a = NodeAddress::from_public_key(&kp.public_key());
        let b = NodeAddress::from_public_key(&kp.public_key());
        assert_eq!(a, b);

        let other = KeyPair::from_seed([10u8; 32]);
        assert_ne!(a, NodeAddress::from_public_key(&other.public_key()));
    }

    #[test]
    fn timestamp_saturating_ops() {
        let t = TimestampNano(1_000);
        assert_eq!(t.saturating_sub(Duration::from_nanos(2_000)).0, 0);
        assert_eq!(t.saturating_add(Duration::from_nanos(500)).0, 1_500);
    }
}
