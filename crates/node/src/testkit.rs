//! In-process multi-node clusters for scenario tests.
//!
//! Wires full nodes over the in-memory gossip hub and in-memory block
//! persistence, with every timer shrunk. Nodes can be held back at
//! construction and started later, which is how the sync and quorum
//! scenarios stage their federations.

use crate::api::PublicApiService;
use crate::config::NodeConfig;
use concord_consensus::BenchmarkConsensus;
use concord_context::ConsensusContextService;
use concord_gossip::{InMemoryNetwork, Transport};
use concord_mempool::TransactionPoolService;
use concord_signer::LocalSigner;
use concord_state::StateStorage;
use concord_storage::{BlockStorageService, BlockSync, InMemoryBlockPersistence};
use concord_types::{
    FederationMember, FederationTopology, KeyPair, NodeAddress, SignedTransaction,
    TimestampNano, Transaction, VirtualChainId, PROTOCOL_VERSION,
};
use concord_vm::NativeVm;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One member node of a test cluster.
pub struct TestNode {
    pub keypair: KeyPair,
    pub address: NodeAddress,
    pub transport: Arc<dyn Transport>,
    pub pool: Arc<TransactionPoolService>,
    pub storage: Arc<BlockStorageService>,
    pub api: Arc<PublicApiService>,
    consensus: Arc<BenchmarkConsensus>,
    sync: Arc<BlockSync>,
    started: parking_lot::Mutex<bool>,
}

impl TestNode {
    /// Start the node's tasks (idempotent).
    pub fn start(&self, shutdown: &CancellationToken) {
        let mut started = self.started.lock();
        if *started {
            return;
        }
        *started = true;
        self.pool.start(shutdown.clone());
        self.sync.start(shutdown.clone());
        self.consensus.start(shutdown.clone());
    }
}

/// A federation of in-process nodes sharing one gossip hub.
pub struct TestCluster {
    pub nodes: Vec<Arc<TestNode>>,
    pub topology: FederationTopology,
    pub hub: Arc<InMemoryNetwork>,
    pub shutdown: CancellationToken,
    virtual_chain_id: VirtualChainId,
}

impl TestCluster {
    /// Build an `n`-node cluster (node 0 leads) and start every node whose
    /// index is not listed in `hold_back`.
    pub async fn start(n: usize, hold_back: &[usize]) -> Self {
        Self::start_with_config(n, hold_back, NodeConfig::for_tests()).await
    }

    pub async fn start_with_config(n: usize, hold_back: &[usize], config: NodeConfig) -> Self {
        let shutdown = CancellationToken::new();
        let hub = InMemoryNetwork::new(shutdown.clone());
        let virtual_chain_id = config.virtual_chain();

        let keypairs: Vec<KeyPair> =
            (0..n).map(|i| KeyPair::from_seed([i as u8 + 1; 32])).collect();
        let members: Vec<FederationMember> = keypairs
            .iter()
            .map(|kp| FederationMember {
                address: kp.address(),
                public_key: kp.public_key(),
            })
            .collect();
        let leader = members[0].address;
        let topology =
            FederationTopology::new(members, leader).expect("test federation is valid");

        let mut nodes = Vec::with_capacity(n);
        for keypair in &keypairs {
            nodes.push(Arc::new(build_node(
                keypair.clone(),
                Arc::new(topology.clone()),
                &hub,
                &config,
            )));
        }

        let cluster = Self {
            nodes,
            topology,
            hub,
            shutdown,
            virtual_chain_id,
        };
        for (i, node) in cluster.nodes.iter().enumerate() {
            if !hold_back.contains(&i) {
                node.start(&cluster.shutdown);
            }
        }
        cluster
    }

    pub fn leader(&self) -> &Arc<TestNode> {
        &self.nodes[0]
    }

    /// A fresh `kv.put` transaction signed by the given node's key.
    pub fn transaction(&self, signer_index: usize, salt: u64) -> SignedTransaction {
        let keypair = &self.nodes[signer_index].keypair;
        let body = Transaction {
            protocol_version: PROTOCOL_VERSION,
            virtual_chain_id: self.virtual_chain_id,
            timestamp: TimestampNano::now(),
            contract_name: "kv".to_string(),
            method_name: "put".to_string(),
            input_arguments: vec![salt.to_be_bytes().to_vec(), b"value".to_vec()],
            signer_public_key: keypair.public_key(),
            salt,
        };
        SignedTransaction::sign(body, keypair)
    }

    /// Wait until `node` reaches at least `height`, or panic at `timeout`.
    pub async fn wait_for_height(
        &self,
        node_index: usize,
        height: u64,
        timeout: std::time::Duration,
    ) {
        let storage = self.nodes[node_index].storage.clone();
        tokio::time::timeout(timeout, async move {
            let mut watch = storage.tip_watch();
            while storage.tip_height().0 < height {
                if watch.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "node {node_index} stuck at height {} waiting for {height}",
                self.nodes[node_index].storage.tip_height()
            )
        });
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn build_node(
    keypair: KeyPair,
    topology: Arc<FederationTopology>,
    hub: &Arc<InMemoryNetwork>,
    config: &NodeConfig,
) -> TestNode {
    let address = keypair.address();
    let transport: Arc<dyn Transport> = hub.join(address);
    let signer = Arc::new(LocalSigner::new(keypair.clone()));

    let state = Arc::new(StateStorage::new(config.state_config()));
    let vm = Arc::new(NativeVm::new(state.clone()));

    let pool = TransactionPoolService::new(
        config.pool_config(),
        topology.clone(),
        signer.clone(),
        vm.clone(),
        transport.clone(),
    );
    let storage = BlockStorageService::new(
        config.storage_config(),
        topology,
        Arc::new(InMemoryBlockPersistence::new()),
        pool.clone(),
        state.clone(),
    )
    .expect("in-memory storage opens");
    let sync = BlockSync::new(storage.clone(), transport.clone(), signer.clone());
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
        transport.clone(),
    );
    let api = PublicApiService::new(
        pool.clone(),
        storage.clone(),
        vm,
        config.query_grace_timeout(),
    );

    TestNode {
        keypair,
        address,
        transport,
        pool,
        storage,
        api,
        consensus,
        sync,
        started: parking_lot::Mutex::new(false),
    }
}
