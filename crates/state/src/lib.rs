//! Versioned contract state.
//!
//! Stores key/value entries keyed by `(contract, key)`, versioned by block
//! height. Writes are height-ordered: the diffs of block `h` are applied on
//! top of the snapshot at `h-1`. Reads are served from retained per-height
//! snapshots without blocking writers. The last
//! `state_history_retention_in_block_heights` heights are retained; older
//! snapshots are pruned.
//!
//! Every height has a deterministic state Merkle root over the full sorted
//! entry set, which results blocks carry as the pre-execution state root.

mod fs;

pub use fs::{FilesystemStateDiffStore, StateDiffPersistence};

use concord_types::{merkle_root, BlockHeight, ContractStateDiff, Sha256};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Configuration view for the state store.
#[derive(Debug, Clone)]
pub struct StateStorageConfig {
    /// How many recent heights keep a readable snapshot.
    pub state_history_retention_in_block_heights: u64,
}

impl Default for StateStorageConfig {
    fn default() -> Self {
        Self {
            state_history_retention_in_block_heights: 5,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state writes must be height-ordered: expected {expected}, got {actual}")]
    OutOfOrderWrite {
        expected: BlockHeight,
        actual: BlockHeight,
    },
    #[error("height {0} is outside the retained history")]
    HeightOutOfRetention(BlockHeight),
    #[error("height {0} has not been written yet")]
    HeightNotWritten(BlockHeight),
    #[error("state store i/o error: {0}")]
    Io(String),
    #[error("{0}")]
    BadStore(&'static str),
    #[error("state store codec version {0} is not supported")]
    UnsupportedCodecVersion(u16),
}

impl StateError {
    fn io(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

type EntryKey = (String, Vec<u8>);

#[derive(Debug, Clone, Default)]
struct Snapshot {
    entries: Arc<BTreeMap<EntryKey, Vec<u8>>>,
    root: Sha256,
}

#[derive(Debug, Default)]
struct Inner {
    /// Snapshot per retained height. Height 0 is the implicit empty state.
    snapshots: BTreeMap<BlockHeight, Snapshot>,
    last_written: BlockHeight,
}

/// The state store. Cheap to clone snapshots: entry maps are shared `Arc`s
/// and copied on write only. With a persistence sink attached, every
/// accepted write is appended to the on-disk diff log before it becomes
/// visible.
pub struct StateStorage {
    config: StateStorageConfig,
    inner: RwLock<Inner>,
    persistence: Option<Arc<dyn StateDiffPersistence>>,
}

impl StateStorage {
    /// Volatile store; callers that need durability replay the block log
    /// or use [`StateStorage::with_persistence`].
    pub fn new(config: StateStorageConfig) -> Self {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(BlockHeight::GENESIS, Snapshot::default());
        Self {
            config,
            inner: RwLock::new(Inner {
                snapshots,
                last_written: BlockHeight::GENESIS,
            }),
            persistence: None,
        }
    }

    /// Durable store: replay `records` (as loaded from the diff log) and
    /// append every future write to `persistence`.
    pub fn with_persistence(
        config: StateStorageConfig,
        persistence: Arc<dyn StateDiffPersistence>,
        records: Vec<(BlockHeight, Vec<ContractStateDiff>)>,
    ) -> Result<Self, StateError> {
        let mut storage = Self::new(config);
        for (height, diffs) in records {
            storage.apply(height, &diffs)?;
        }
        storage.persistence = Some(persistence);
        Ok(storage)
    }

    /// Apply the state diffs of block `height` on top of `height - 1`,
    /// appending to the diff log first when one is attached.
    pub fn write_at(
        &self,
        height: BlockHeight,
        diffs: &[ContractStateDiff],
    ) -> Result<Sha256, StateError> {
        if let Some(persistence) = &self.persistence {
            persistence.append(height, diffs)?;
        }
        self.apply(height, diffs)
    }

    fn apply(&self, height: BlockHeight, diffs: &[ContractStateDiff]) -> Result<Sha256, StateError> {
        let mut inner = self.inner.write();
        let expected = inner.last_written.next();
        if height != expected {
            return Err(StateError::OutOfOrderWrite {
                expected,
                actual: height,
            });
        }

        let base = inner
            .snapshots
            .get(&inner.last_written)
            .cloned()
            .unwrap_or_default();
        let mut entries = (*base.entries).clone();
        for diff in diffs {
            for record in &diff.records {
                entries.insert(
                    (diff.contract_name.clone(), record.key.clone()),
                    record.value.clone(),
                );
            }
        }
        let root = compute_state_root(&entries);
        inner.snapshots.insert(
            height,
            Snapshot {
                entries: Arc::new(entries),
                root,
            },
        );
        inner.last_written = height;

        let retention = self.config.state_history_retention_in_block_heights;
        let cutoff = height.0.saturating_sub(retention);
        let retained = inner.snapshots.split_off(&BlockHeight(cutoff));
        inner.snapshots = retained;

        debug!(%height, %root, "state snapshot written");
        Ok(root)
    }

    /// Read one key at `height`, or at the latest height when `None`.
    pub fn read_key(
        &self,
        height: Option<BlockHeight>,
        contract: &str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StateError> {
        let inner = self.inner.read();
        let snapshot = self.snapshot_at(&inner, height)?;
        Ok(snapshot
            .entries
            .get(&(contract.to_string(), key.to_vec()))
            .cloned())
    }

    /// The state Merkle root at `height`.
    pub fn get_state_hash(&self, height: BlockHeight) -> Result<Sha256, StateError> {
        let inner = self.inner.read();
        Ok(self.snapshot_at(&inner, Some(height))?.root)
    }

    pub fn last_written_height(&self) -> BlockHeight {
        self.inner.read().last_written
    }

    fn snapshot_at<'a>(
        &self,
        inner: &'a Inner,
        height: Option<BlockHeight>,
    ) -> Result<&'a Snapshot, StateError> {
        let height = height.unwrap_or(inner.last_written);
        if height > inner.last_written {
            return Err(StateError::HeightNotWritten(height));
        }
        inner
            .snapshots
            .get(&height)
            .ok_or(StateError::HeightOutOfRetention(height))
    }
}

fn compute_state_root(entries: &BTreeMap<EntryKey, Vec<u8>>) -> Sha256 {
    // BTreeMap iteration is already sorted, so the root is deterministic.
    let leaves: Vec<Sha256> = entries
        .iter()
        .map(|((contract, key), value)| {
            Sha256::of_encodable(&(contract.clone(), key.clone(), value.clone()))
        })
        .collect();
    merkle_root(&leaves)
}
