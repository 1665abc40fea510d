//! Filesystem block persistence.
//!
//! Two files per virtual chain under the data directory:
//!
//! - `blocks.log`: append-only records, one per block pair:
//!   `u32 len | u32 crc32 | len bytes of SBOR`, after a 6-byte file header
//!   `"CNCB" | u16 codec_version`.
//! - `blocks.idx`: fixed-width `u64` record offsets in log order, after a
//!   `"CNCI" | u16 codec_version` header. Record `i` holds height `i + 1`.
//!
//! An incompatible codec version refuses to open; a CRC failure on read
//! refuses to serve the record. Appends fsync both files before returning.

use crate::persistence::{BlockPersistence, PersistenceError};
use concord_types::{BlockHeight, BlockPair, VirtualChainId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const LOG_MAGIC: &[u8; 4] = b"CNCB";
const IDX_MAGIC: &[u8; 4] = b"CNCI";
const CODEC_VERSION: u16 = 1;
const HEADER_LEN: u64 = 6;

#[derive(Debug)]
struct Files {
    log: File,
    idx: File,
    /// Record start offsets, in height order.
    offsets: Vec<u64>,
    /// Append position in the log.
    log_end: u64,
}

/// Durable block store over an append-only log plus offset index.
#[derive(Debug)]
pub struct FilesystemBlockPersistence {
    files: Mutex<Files>,
    dir: PathBuf,
}

impl FilesystemBlockPersistence {
    /// Open (or create) the store for `virtual_chain_id` under `data_dir`.
    pub fn open(
        data_dir: &Path,
        virtual_chain_id: VirtualChainId,
    ) -> Result<Self, PersistenceError> {
        let dir = data_dir.join(format!("vchain-{}", virtual_chain_id.0));
        std::fs::create_dir_all(&dir)?;

        let mut log = open_store_file(&dir.join("blocks.log"), LOG_MAGIC)?;
        let mut idx = open_store_file(&dir.join("blocks.idx"), IDX_MAGIC)?;

        let offsets = read_index(&mut idx)?;
        let log_end = log.seek(SeekFrom::End(0))?;
        info!(
            path = %dir.display(),
            blocks = offsets.len(),
            "block store opened"
        );
        Ok(Self {
            files: Mutex::new(Files {
                log,
                idx,
                offsets,
                log_end,
            }),
            dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn read_record(files: &mut Files, height: BlockHeight) -> Result<BlockPair, PersistenceError> {
        let offset = files.offsets[height.0 as usize - 1];
        files.log.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        files.log.read_exact(&mut header)?;
        let len = u32::from_le_bytes(header[..4].try_into().expect("4 bytes"));
        let crc = u32::from_le_bytes(header[4..].try_into().expect("4 bytes"));

        let mut record = vec![0u8; len as usize];
        files.log.read_exact(&mut record)?;
        if crc32fast::hash(&record) != crc {
            return Err(PersistenceError::CorruptRecord(height));
        }
        sbor::basic_decode(&record).map_err(|e| PersistenceError::Decode(format!("{e:?}")))
    }
}

impl BlockPersistence for FilesystemBlockPersistence {
    fn append_block(&self, pair: &BlockPair) -> Result<(), PersistenceError> {
        let mut files = self.files.lock();
        let tip = BlockHeight(files.offsets.len() as u64);
        if pair.height() != tip.next() {
            return Err(PersistenceError::NonContiguousAppend {
                tip,
                actual: pair.height(),
            });
        }

        let record =
            sbor::basic_encode(pair).map_err(|e| PersistenceError::Decode(format!("{e:?}")))?;
        let crc = crc32fast::hash(&record);
        let offset = files.log_end;

        files.log.seek(SeekFrom::Start(offset))?;
        files.log.write_all(&(record.len() as u32).to_le_bytes())?;
        files.log.write_all(&crc.to_le_bytes())?;
        files.log.write_all(&record)?;
        files.log.sync_data()?;

        files.idx.seek(SeekFrom::End(0))?;
        files.idx.write_all(&offset.to_le_bytes())?;
        files.idx.sync_data()?;

        files.log_end = offset + 8 + record.len() as u64;
        files.offsets.push(offset);
        Ok(())
    }

    fn block_at(&self, height: BlockHeight) -> Result<Option<BlockPair>, PersistenceError> {
        let mut files = self.files.lock();
        if height.is_genesis() || height.0 as usize > files.offsets.len() {
            return Ok(None);
        }
        Self::read_record(&mut files, height).map(Some)
    }

    fn blocks_in_range(
        &self,
        first: BlockHeight,
        max: usize,
    ) -> Result<Vec<BlockPair>, PersistenceError> {
        let mut files = self.files.lock();
        if first.is_genesis() || max == 0 {
            return Ok(Vec::new());
        }
        let tip = files.offsets.len() as u64;
        let mut blocks = Vec::new();
        let mut height = first;
        while height.0 <= tip && blocks.len() < max {
            blocks.push(Self::read_record(&mut files, height)?);
            height = height.next();
        }
        Ok(blocks)
    }

    fn tip_height(&self) -> Result<BlockHeight, PersistenceError> {
        Ok(BlockHeight(self.files.lock().offsets.len() as u64))
    }
}

/// Open a store file, writing the header when new and validating it when
/// existing.
fn open_store_file(path: &Path, magic: &[u8; 4]) -> Result<File, PersistenceError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        file.write_all(magic)?;
        file.write_all(&CODEC_VERSION.to_le_bytes())?;
        file.sync_data()?;
        return Ok(file);
    }
    if len < HEADER_LEN {
        return Err(PersistenceError::BadHeader);
    }
    file.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)?;
    if &header[..4] != magic {
        return Err(PersistenceError::BadHeader);
    }
    let found = u16::from_le_bytes(header[4..6].try_into().expect("2 bytes"));
    if found != CODEC_VERSION {
        return Err(PersistenceError::CodecVersionMismatch { found });
    }
    Ok(file)
}

fn read_index(idx: &mut File) -> Result<Vec<u64>, PersistenceError> {
    let end = idx.seek(SeekFrom::End(0))?;
    let body = end - HEADER_LEN;
    if body % 8 != 0 {
        return Err(PersistenceError::BadHeader);
    }
    idx.seek(SeekFrom::Start(HEADER_LEN))?;
    let mut offsets = Vec::with_capacity((body / 8) as usize);
    let mut buf = [0u8; 8];
    for _ in 0..body / 8 {
        idx.read_exact(&mut buf)?;
        offsets.push(u64::from_le_bytes(buf));
    }
    Ok(offsets)
}
