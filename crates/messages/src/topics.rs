//! Gossip topics.

use sbor::prelude::BasicSbor;

/// A gossip topic. Each topic has a dedicated bounded dispatch queue on the
/// receiving side, so slow consumers on one topic never stall another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum Topic {
    TransactionRelay,
    BlockSync,
    LeanHelix,
    BenchmarkConsensus,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::TransactionRelay,
        Topic::BlockSync,
        Topic::LeanHelix,
        Topic::BenchmarkConsensus,
    ];

    /// Wire identifier of the topic.
    pub fn as_u16(self) -> u16 {
        match self {
            Topic::TransactionRelay => 1,
            Topic::BlockSync => 2,
            Topic::LeanHelix => 3,
            Topic::BenchmarkConsensus => 4,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Topic::TransactionRelay),
            2 => Some(Topic::BlockSync),
            3 => Some(Topic::LeanHelix),
            4 => Some(Topic::BenchmarkConsensus),
            _ => None,
        }
    }

    /// Metric label for this topic.
    pub fn name(self) -> &'static str {
        match self {
            Topic::TransactionRelay => "transaction_relay",
            Topic::BlockSync => "block_sync",
            Topic::LeanHelix => "lean_helix",
            Topic::BenchmarkConsensus => "benchmark_consensus",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_u16(topic.as_u16()), Some(topic));
        }
        assert_eq!(Topic::from_u16(9), None);
    }
}
