//! Filesystem state-diff store.
//!
//! An append-only log of per-height diff sets under the chain's data
//! directory: file header `"CNCS" | u16 codec_version`, then one record
//! per height: `u64 height | u32 len | u32 crc32 | len bytes of SBOR`.
//! Incompatible codec versions refuse to open; a CRC failure refuses to
//! load. The in-memory engine replays the log on open and appends on
//! every write, so restart recovers the exact per-height snapshots the
//! retention window still covers.

use crate::StateError;
use concord_types::{BlockHeight, ContractStateDiff, VirtualChainId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::info;

const STATE_MAGIC: &[u8; 4] = b"CNCS";
const CODEC_VERSION: u16 = 1;

/// Durable sink for committed state diffs.
pub trait StateDiffPersistence: Send + Sync {
    fn append(&self, height: BlockHeight, diffs: &[ContractStateDiff]) -> Result<(), StateError>;
}

/// Append-only diff log.
pub struct FilesystemStateDiffStore {
    file: Mutex<File>,
}

impl FilesystemStateDiffStore {
    /// Open (or create) the store and return it together with the replay
    /// of every persisted height, in order.
    pub fn open(
        data_dir: &Path,
        virtual_chain_id: VirtualChainId,
    ) -> Result<(Self, Vec<(BlockHeight, Vec<ContractStateDiff>)>), StateError> {
        let dir = data_dir.join(format!("vchain-{}", virtual_chain_id.0));
        std::fs::create_dir_all(&dir).map_err(StateError::io)?;
        let path = dir.join("state.log");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(StateError::io)?;

        let end = file.seek(SeekFrom::End(0)).map_err(StateError::io)?;
        if end == 0 {
            file.write_all(STATE_MAGIC).map_err(StateError::io)?;
            file.write_all(&CODEC_VERSION.to_le_bytes())
                .map_err(StateError::io)?;
            file.sync_data().map_err(StateError::io)?;
            return Ok((
                Self {
                    file: Mutex::new(file),
                },
                Vec::new(),
            ));
        }

        file.seek(SeekFrom::Start(0)).map_err(StateError::io)?;
        let mut header = [0u8; 6];
        file.read_exact(&mut header).map_err(StateError::io)?;
        if &header[..4] != STATE_MAGIC {
            return Err(StateError::BadStore("malformed state store header"));
        }
        let found = u16::from_le_bytes(header[4..6].try_into().expect("2 bytes"));
        if found != CODEC_VERSION {
            return Err(StateError::UnsupportedCodecVersion(found));
        }

        let mut records = Vec::new();
        let mut position = 6u64;
        while position < end {
            let mut fixed = [0u8; 16];
            file.read_exact(&mut fixed).map_err(StateError::io)?;
            let height = u64::from_le_bytes(fixed[..8].try_into().expect("8 bytes"));
            let len = u32::from_le_bytes(fixed[8..12].try_into().expect("4 bytes"));
            let crc = u32::from_le_bytes(fixed[12..16].try_into().expect("4 bytes"));

            let mut body = vec![0u8; len as usize];
            file.read_exact(&mut body).map_err(StateError::io)?;
            if crc32fast::hash(&body) != crc {
                return Err(StateError::BadStore("state record failed its crc"));
            }
            let diffs: Vec<ContractStateDiff> = sbor::basic_decode(&body)
                .map_err(|_| StateError::BadStore("state record failed to decode"))?;
            records.push((BlockHeight(height), diffs));
            position += 16 + len as u64;
        }

        info!(path = %path.display(), heights = records.len(), "state store opened");
        Ok((
            Self {
                file: Mutex::new(file),
            },
            records,
        ))
    }
}

impl StateDiffPersistence for FilesystemStateDiffStore {
    fn append(&self, height: BlockHeight, diffs: &[ContractStateDiff]) -> Result<(), StateError> {
        let body = sbor::basic_encode(&diffs.to_vec())
            .map_err(|_| StateError::BadStore("state record failed to encode"))?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0)).map_err(StateError::io)?;
        file.write_all(&height.0.to_le_bytes()).map_err(StateError::io)?;
        file.write_all(&(body.len() as u32).to_le_bytes())
            .map_err(StateError::io)?;
        file.write_all(&crc32fast::hash(&body).to_le_bytes())
            .map_err(StateError::io)?;
        file.write_all(&body).map_err(StateError::io)?;
        file.sync_data().map_err(StateError::io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StateStorage, StateStorageConfig};
    use concord_types::StateRecord;
    use std::sync::Arc;

    const VCHAIN: VirtualChainId = VirtualChainId(42);

    fn diff(key: &[u8], value: &[u8]) -> ContractStateDiff {
        ContractStateDiff {
            contract_name: "kv".to_string(),
            records: vec![StateRecord {
                key: key.to_vec(),
                value: value.to_vec(),
            }],
        }
    }

    #[test]
    fn state_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root_before = {
            let (store, records) =
                FilesystemStateDiffStore::open(dir.path(), VCHAIN).unwrap();
            assert!(records.is_empty());
            let state = StateStorage::with_persistence(
                StateStorageConfig::default(),
                Arc::new(store),
                records,
            )
            .unwrap();
            state.write_at(BlockHeight(1), &[diff(b"a", b"1")]).unwrap();
            state.write_at(BlockHeight(2), &[diff(b"b", b"2")]).unwrap();
            state.get_state_hash(BlockHeight(2)).unwrap()
        };

        let (store, records) = FilesystemStateDiffStore::open(dir.path(), VCHAIN).unwrap();
        assert_eq!(records.len(), 2);
        let state = StateStorage::with_persistence(
            StateStorageConfig::default(),
            Arc::new(store),
            records,
        )
        .unwrap();
        assert_eq!(state.last_written_height(), BlockHeight(2));
        assert_eq!(state.get_state_hash(BlockHeight(2)).unwrap(), root_before);
        assert_eq!(
            state.read_key(None, "kv", b"a").unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn incompatible_version_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            FilesystemStateDiffStore::open(dir.path(), VCHAIN).unwrap();
        }
        let path = dir.path().join("vchain-42").join("state.log");
        let mut contents = std::fs::read(&path).unwrap();
        contents[4] = 0xFF;
        std::fs::write(&path, contents).unwrap();

        assert!(matches!(
            FilesystemStateDiffStore::open(dir.path(), VCHAIN),
            Err(StateError::UnsupportedCodecVersion(_))
        ));
    }
}
