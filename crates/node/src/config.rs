//! Node configuration.
//!
//! One flat record with every tunable; each service receives a narrow view
//! built by the accessor methods rather than the whole record. Durations
//! are stored as integer milliseconds so the JSON form stays obvious.

use concord_consensus::BenchmarkConsensusConfig;
use concord_context::ConsensusContextConfig;
use concord_gossip::{GossipConfig, PeerEndpoint};
use concord_mempool::TransactionPoolConfig;
use concord_state::StateStorageConfig;
use concord_storage::BlockStorageConfig;
use concord_types::{
    FederationMember, FederationTopology, KeyPair, NodeAddress, PublicKey, VirtualChainId,
    PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// One federation member as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationMemberConfig {
    pub public_key_hex: String,
    pub gossip_endpoint: String,
}

/// The flat node configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    // Identity. Exactly one of `node_seed_hex` (in-process signing key)
    // or `signer_endpoint` + `node_public_key_hex` (external signer).
    pub node_seed_hex: Option<String>,
    pub signer_endpoint: Option<String>,
    pub node_public_key_hex: Option<String>,

    pub virtual_chain_id: u32,
    pub data_dir: PathBuf,

    // Federation.
    pub federation: Vec<FederationMemberConfig>,
    pub leader_public_key_hex: String,

    // Gossip.
    pub gossip_listen_address: String,
    pub gossip_network_timeout_ms: u64,
    pub gossip_keepalive_interval_ms: u64,
    pub gossip_reconnect_interval_ms: u64,
    pub gossip_send_queue_capacity: usize,

    // Transaction pool.
    pub pending_pool_size_in_bytes: usize,
    pub transaction_expiration_window_ms: u64,
    pub future_timestamp_grace_ms: u64,
    pub max_transaction_size_in_bytes: usize,
    pub pending_pool_clear_expired_interval_ms: u64,
    pub committed_pool_clear_expired_interval_ms: u64,
    pub committed_pool_retention_ms: u64,
    pub forward_flush_interval_ms: u64,
    pub forward_batch_size: usize,

    // Block storage and sync.
    pub tx_receipt_expiration_window_ms: u64,
    pub future_block_timestamp_grace_ms: u64,
    pub sync_batch_size: usize,
    pub sync_no_commit_interval_ms: u64,
    pub sync_collect_responses_timeout_ms: u64,
    pub sync_collect_chunks_timeout_ms: u64,

    // State storage.
    pub state_history_retention_in_block_heights: u64,

    // Consensus context.
    pub max_transactions_in_block: usize,
    pub max_block_size_in_bytes: usize,
    pub min_transactions_in_block: usize,
    pub below_minimal_block_delay_ms: u64,
    pub timestamp_jitter_grace_ms: u64,

    // Benchmark consensus.
    pub round_retry_interval_ms: u64,
    pub proposal_retry_backoff_ms: u64,

    // Public API.
    pub query_grace_timeout_ms: u64,

    // Shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_seed_hex: None,
            signer_endpoint: None,
            node_public_key_hex: None,
            virtual_chain_id: 42,
            data_dir: PathBuf::from("./data"),
            federation: Vec::new(),
            leader_public_key_hex: String::new(),
            gossip_listen_address: "0.0.0.0:4400".to_string(),
            gossip_network_timeout_ms: 30_000,
            gossip_keepalive_interval_ms: 20_000,
            gossip_reconnect_interval_ms: 5_000,
            gossip_send_queue_capacity: 16,
            pending_pool_size_in_bytes: 20 * 1024 * 1024,
            transaction_expiration_window_ms: 30 * 60 * 1_000,
            future_timestamp_grace_ms: 3 * 60 * 1_000,
            max_transaction_size_in_bytes: 32 * 1024,
            pending_pool_clear_expired_interval_ms: 10_000,
            committed_pool_clear_expired_interval_ms: 30_000,
            committed_pool_retention_ms: 30 * 60 * 1_000,
            forward_flush_interval_ms: 100,
            forward_batch_size: 100,
            tx_receipt_expiration_window_ms: 30 * 60 * 1_000,
            future_block_timestamp_grace_ms: 3 * 60 * 1_000,
            sync_batch_size: 10_000,
            sync_no_commit_interval_ms: 8_000,
            sync_collect_responses_timeout_ms: 3_000,
            sync_collect_chunks_timeout_ms: 15_000,
            state_history_retention_in_block_heights: 5,
            max_transactions_in_block: 1_000,
            max_block_size_in_bytes: 4 * 1024 * 1024,
            min_transactions_in_block: 1,
            below_minimal_block_delay_ms: 300,
            timestamp_jitter_grace_ms: 60_000,
            round_retry_interval_ms: 2_000,
            proposal_retry_backoff_ms: 250,
            query_grace_timeout_ms: 1_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Shrink every timer for in-process tests.
    pub fn for_tests() -> Self {
        Self {
            gossip_network_timeout_ms: 2_000,
            gossip_keepalive_interval_ms: 500,
            gossip_reconnect_interval_ms: 50,
            pending_pool_clear_expired_interval_ms: 200,
            committed_pool_clear_expired_interval_ms: 200,
            forward_flush_interval_ms: 20,
            sync_no_commit_interval_ms: 300,
            sync_collect_responses_timeout_ms: 150,
            sync_collect_chunks_timeout_ms: 500,
            sync_batch_size: 4,
            // Empty blocks close after the below-minimal delay, which also
            // paces the chain so sync catch-up can win the race.
            min_transactions_in_block: 1,
            below_minimal_block_delay_ms: 100,
            round_retry_interval_ms: 150,
            proposal_retry_backoff_ms: 30,
            query_grace_timeout_ms: 2_000,
            shutdown_timeout_ms: 1_000,
            ..Self::default()
        }
    }

    pub fn virtual_chain(&self) -> VirtualChainId {
        VirtualChainId(self.virtual_chain_id)
    }

    /// The federation topology, validated.
    pub fn topology(&self) -> Result<FederationTopology, ConfigError> {
        let mut members = Vec::new();
        for member in &self.federation {
            let key = parse_public_key(&member.public_key_hex)
                .ok_or_else(|| invalid("federation", "malformed member public key"))?;
            members.push(FederationMember {
                address: key.address(),
                public_key: key,
            });
        }
        let leader = parse_public_key(&self.leader_public_key_hex)
            .ok_or_else(|| invalid("leader_public_key_hex", "malformed public key"))?;
        FederationTopology::new(members, leader.address())
            .map_err(|e| invalid("federation", e.to_string()))
    }

    /// The local signing identity.
    pub fn signer(&self) -> Result<std::sync::Arc<dyn concord_signer::Signer>, ConfigError> {
        match (&self.node_seed_hex, &self.signer_endpoint) {
            (Some(seed), None) => {
                let keypair = KeyPair::from_seed_hex(seed)
                    .ok_or_else(|| invalid("node_seed_hex", "expected 32 hex-encoded bytes"))?;
                Ok(std::sync::Arc::new(concord_signer::LocalSigner::new(keypair)))
            }
            (None, Some(endpoint)) => {
                let key_hex = self
                    .node_public_key_hex
                    .as_ref()
                    .ok_or_else(|| {
                        invalid("node_public_key_hex", "required with signer_endpoint")
                    })?;
                let key = parse_public_key(key_hex)
                    .ok_or_else(|| invalid("node_public_key_hex", "malformed public key"))?;
                Ok(std::sync::Arc::new(concord_signer::HttpSigner::new(
                    endpoint.clone(),
                    key,
                )))
            }
            _ => Err(invalid(
                "node_seed_hex",
                "configure exactly one of node_seed_hex or signer_endpoint",
            )),
        }
    }

    /// Gossip view: every federation member except ourselves is a peer.
    pub fn gossip_config(&self, own_address: NodeAddress) -> Result<GossipConfig, ConfigError> {
        let listen_address: SocketAddr = self
            .gossip_listen_address
            .parse()
            .map_err(|e| invalid("gossip_listen_address", format!("{e}")))?;
        let mut peers = Vec::new();
        for member in &self.federation {
            let key = parse_public_key(&member.public_key_hex)
                .ok_or_else(|| invalid("federation", "malformed member public key"))?;
            if key.address() == own_address {
                continue;
            }
            let endpoint: SocketAddr = member
                .gossip_endpoint
                .parse()
                .map_err(|e| invalid("federation", format!("bad gossip endpoint: {e}")))?;
            peers.push(PeerEndpoint {
                address: key.address(),
                endpoint,
            });
        }
        Ok(GossipConfig {
            listen_address,
            peers,
            network_timeout: Duration::from_millis(self.gossip_network_timeout_ms),
            keepalive_interval: Duration::from_millis(self.gossip_keepalive_interval_ms),
            reconnect_interval: Duration::from_millis(self.gossip_reconnect_interval_ms),
            send_queue_capacity: self.gossip_send_queue_capacity,
        })
    }

    pub fn pool_config(&self) -> TransactionPoolConfig {
        TransactionPoolConfig {
            virtual_chain_id: self.virtual_chain(),
            pending_pool_size_in_bytes: self.pending_pool_size_in_bytes,
            transaction_expiration_window: Duration::from_millis(
                self.transaction_expiration_window_ms,
            ),
            future_timestamp_grace: Duration::from_millis(self.future_timestamp_grace_ms),
            max_transaction_size_in_bytes: self.max_transaction_size_in_bytes,
            pending_pool_clear_expired_interval: Duration::from_millis(
                self.pending_pool_clear_expired_interval_ms,
            ),
            committed_pool_clear_expired_interval: Duration::from_millis(
                self.committed_pool_clear_expired_interval_ms,
            ),
            committed_pool_retention: Duration::from_millis(self.committed_pool_retention_ms),
            forward_flush_interval: Duration::from_millis(self.forward_flush_interval_ms),
            forward_batch_size: self.forward_batch_size,
        }
    }

    pub fn storage_config(&self) -> BlockStorageConfig {
        BlockStorageConfig {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id: self.virtual_chain(),
            tx_receipt_expiration_window: Duration::from_millis(
                self.tx_receipt_expiration_window_ms,
            ),
            future_block_timestamp_grace: Duration::from_millis(
                self.future_block_timestamp_grace_ms,
            ),
            sync_batch_size: self.sync_batch_size,
            sync_no_commit_interval: Duration::from_millis(self.sync_no_commit_interval_ms),
            sync_collect_responses_timeout: Duration::from_millis(
                self.sync_collect_responses_timeout_ms,
            ),
            sync_collect_chunks_timeout: Duration::from_millis(
                self.sync_collect_chunks_timeout_ms,
            ),
        }
    }

    pub fn state_config(&self) -> StateStorageConfig {
        StateStorageConfig {
            state_history_retention_in_block_heights: self
                .state_history_retention_in_block_heights,
        }
    }

    pub fn context_config(&self) -> ConsensusContextConfig {
        ConsensusContextConfig {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id: self.virtual_chain(),
            max_transactions_in_block: self.max_transactions_in_block,
            max_block_size_in_bytes: self.max_block_size_in_bytes,
            min_transactions_in_block: self.min_transactions_in_block,
            below_minimal_block_delay: Duration::from_millis(self.below_minimal_block_delay_ms),
            timestamp_jitter_grace: Duration::from_millis(self.timestamp_jitter_grace_ms),
        }
    }

    pub fn consensus_config(&self) -> BenchmarkConsensusConfig {
        BenchmarkConsensusConfig {
            round_retry_interval: Duration::from_millis(self.round_retry_interval_ms),
            proposal_retry_backoff: Duration::from_millis(self.proposal_retry_backoff_ms),
        }
    }

    pub fn query_grace_timeout(&self) -> Duration {
        Duration::from_millis(self.query_grace_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn parse_public_key(hex_key: &str) -> Option<PublicKey> {
    let bytes = hex::decode(hex_key).ok()?;
    PublicKey::from_slice(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_signer::Signer as _;

    fn keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed([seed; 32])
    }

    fn config_with_federation(n: u8) -> NodeConfig {
        let mut config = NodeConfig::for_tests();
        config.federation = (1..=n)
            .map(|s| FederationMemberConfig {
                public_key_hex: hex::encode(keypair(s).public_key().as_bytes()),
                gossip_endpoint: format!("127.0.0.1:44{s:02}"),
            })
            .collect();
        config.leader_public_key_hex = hex::encode(keypair(1).public_key().as_bytes());
        config.node_seed_hex = Some(hex::encode([1u8; 32]));
        config
    }

    #[test]
    fn round_trips_through_json() {
        let config = config_with_federation(4);
        let json = serde_json::to_string_pretty(&config).unwrap();
        let reloaded: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.federation.len(), 4);
        assert_eq!(reloaded.virtual_chain_id, config.virtual_chain_id);
    }

    #[test]
    fn topology_and_views_build() {
        let config = config_with_federation(4);
        let topology = config.topology().unwrap();
        assert_eq!(topology.size(), 4);
        assert_eq!(topology.quorum(), 3);

        let signer = config.signer().unwrap();
        let gossip = config.gossip_config(signer.node_address()).unwrap();
        // We are one of the four members, so three peers remain.
        assert_eq!(gossip.peers.len(), 3);
    }

    #[test]
    fn rejects_ambiguous_identity() {
        let mut config = config_with_federation(4);
        config.signer_endpoint = Some("http://127.0.0.1:7766".to_string());
        assert!(config.signer().is_err());

        config.node_seed_hex = None;
        config.node_public_key_hex =
            Some(hex::encode(keypair(1).public_key().as_bytes()));
        assert!(config.signer().is_ok());
    }

    #[test]
    fn rejects_malformed_keys() {
        let mut config = config_with_federation(4);
        config.leader_public_key_hex = "zz".to_string();
        assert!(matches!(
            config.topology(),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
