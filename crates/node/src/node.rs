//! Production node assembly.

use crate::api::PublicApiService;
use crate::config::{ConfigError, NodeConfig};
use crate::supervisor::Supervisor;
use concord_consensus::BenchmarkConsensus;
use concord_context::ConsensusContextService;
use concord_gossip::{TcpTransport, Transport, TransportError};
use concord_mempool::TransactionPoolService;
use concord_signer::Signer as _;
use concord_state::{FilesystemStateDiffStore, StateStorage};
use concord_storage::{
    BlockStorageError, BlockStorageService, BlockSync, FilesystemBlockPersistence,
    PersistenceError,
};
use concord_vm::NativeVm;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport startup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("storage startup failed: {0}")]
    Storage(#[from] BlockStorageError),
    #[error("storage startup failed: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("state store startup failed: {0}")]
    State(#[from] concord_state::StateError),
}

/// A running node: every service wired and supervised.
pub struct Node {
    pub api: Arc<PublicApiService>,
    pub storage: Arc<BlockStorageService>,
    pub pool: Arc<TransactionPoolService>,
    config: NodeConfig,
    supervisor: Supervisor,
}

impl Node {
    /// Build and start every service from the flat configuration.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        let signer = config.signer()?;
        let topology = Arc::new(config.topology()?);
        let own_address = signer.node_address();
        info!(
            address = ?own_address,
            leader = topology.is_leader(own_address),
            federation_size = topology.size(),
            "starting node"
        );

        let mut supervisor = Supervisor::new();

        let transport: Arc<dyn Transport> = TcpTransport::start(
            config.gossip_config(own_address)?,
            supervisor.child_token(),
        )
        .await?;

        let (state_store, state_records) =
            FilesystemStateDiffStore::open(&config.data_dir, config.virtual_chain())?;
        let state = Arc::new(StateStorage::with_persistence(
            config.state_config(),
            Arc::new(state_store),
            state_records,
        )?);
        let vm = Arc::new(NativeVm::new(state.clone()));

        let pool = TransactionPoolService::new(
            config.pool_config(),
            topology.clone(),
            signer.clone(),
            vm.clone(),
            transport.clone(),
        );
        supervisor.register_all("txpool", pool.start(supervisor.child_token()));

        let persistence = Arc::new(FilesystemBlockPersistence::open(
            &config.data_dir,
            config.virtual_chain(),
        )?);
        let storage = BlockStorageService::new(
            config.storage_config(),
            topology,
            persistence,
            pool.clone(),
            state.clone(),
        )?;

        let sync = BlockSync::new(storage.clone(), transport.clone(), signer.clone());
        supervisor.register("block-sync", sync.start(supervisor.child_token()));

        let context = ConsensusContextService::new(
            config.context_config(),
            pool.clone(),
            vm.clone(),
            state,
        );
        let consensus = BenchmarkConsensus::new(
            config.consensus_config(),
            signer,
            context,
            storage.clone(),
            transport,
        );
        supervisor.register("consensus", consensus.start(supervisor.child_token()));

        let api = PublicApiService::new(
            pool.clone(),
            storage.clone(),
            vm,
            config.query_grace_timeout(),
        );

        Ok(Self {
            api,
            storage,
            pool,
            config,
            supervisor,
        })
    }

    /// Graceful shutdown bounded by the configured timeout.
    pub async fn shutdown(self) {
        info!("node shutting down");
        self.supervisor.shutdown(self.config.shutdown_timeout()).await;
    }
}
