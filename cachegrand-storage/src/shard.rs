//! Per-worker append-only shard files.
//!
//! Shards are exclusively owned by the worker that writes them — no file
//! write ever crosses workers — so the backend here takes no internal
//! locking beyond what's needed for the active-shard swap on exhaustion.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::chunk::Chunk;
use crate::error::{Result, StorageError};

const SHARD_MAGIC: [u8; 8] = *b"CGSHARD1";
const SHARD_VERSION: u32 = 1;
const SHARD_HEADER_LEN: u64 = 8 + 4 + 8 + 4; // magic + version + created_at + shard_index

/// Default size at which a shard is considered full and a new one opened.
pub const DEFAULT_SHARD_MAX_BYTES: u64 = 256 * 1024 * 1024;

struct ShardFile {
    file: File,
    index: u32,
    write_offset: u64,
    max_bytes: u64,
}

impl ShardFile {
    fn create(base_dir: &Path, index: u32, max_bytes: u64, now_ms: u64) -> Result<Self> {
        let path = shard_path(base_dir, index);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(StorageError::ShardIo)?;

        let mut header = Vec::with_capacity(SHARD_HEADER_LEN as usize);
        header.extend_from_slice(&SHARD_MAGIC);
        header.extend_from_slice(&SHARD_VERSION.to_le_bytes());
        header.extend_from_slice(&now_ms.to_le_bytes());
        header.extend_from_slice(&index.to_le_bytes());
        file.write_all(&header).map_err(StorageError::ShardIo)?;

        Ok(Self {
            file,
            index,
            write_offset: SHARD_HEADER_LEN,
            max_bytes,
        })
    }

    fn remaining(&self) -> u64 {
        self.max_bytes.saturating_sub(self.write_offset)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(u64, u32)> {
        let offset = self.write_offset;
        self.file
            .write_all_at(bytes, offset)
            .map_err(StorageError::ShardIo)?;
        self.write_offset += bytes.len() as u64;
        Ok((offset, bytes.len() as u32))
    }

    fn read(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(StorageError::ShardIo)?;
        Ok(buf)
    }
}

fn shard_path(base_dir: &Path, index: u32) -> PathBuf {
    base_dir.join(format!("shard-{index}.db"))
}

/// Abstracts the file-backed storage layer over a trait, per the design
/// notes on keeping the backend swappable (e.g. an in-memory test double).
pub trait ShardBackend: Send {
    fn write_chunk(&mut self, bytes: &[u8], now_ms: u64) -> Result<Chunk>;
    fn read_chunk(&self, shard_index: u32, offset: u64, len: u32) -> Result<Vec<u8>>;
}

/// The set of shards owned by one worker: one active shard taking new
/// writes, plus every prior shard kept open for reads.
pub struct ShardSet {
    base_dir: PathBuf,
    max_bytes: u64,
    shards: Vec<ShardFile>,
    next_index: u32,
}

impl ShardSet {
    pub fn open(base_dir: impl Into<PathBuf>, max_bytes: u64, now_ms: u64) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(StorageError::ShardIo)?;
        let first = ShardFile::create(&base_dir, 0, max_bytes, now_ms)?;
        Ok(Self {
            base_dir,
            max_bytes,
            shards: vec![first],
            next_index: 1,
        })
    }

    fn active_mut(&mut self) -> &mut ShardFile {
        self.shards.last_mut().expect("shard set always has an active shard")
    }

    fn open_new_active(&mut self, now_ms: u64) -> Result<()> {
        let shard = ShardFile::create(&self.base_dir, self.next_index, self.max_bytes, now_ms)?;
        self.next_index += 1;
        self.shards.push(shard);
        Ok(())
    }

    fn shard_by_index(&self, index: u32) -> Result<&ShardFile> {
        self.shards
            .iter()
            .find(|s| s.index == index)
            .ok_or(StorageError::ShardExhausted)
    }
}

impl ShardBackend for ShardSet {
    fn write_chunk(&mut self, bytes: &[u8], now_ms: u64) -> Result<Chunk> {
        if self.active_mut().remaining() < bytes.len() as u64 {
            self.open_new_active(now_ms)?;
        }
        if self.active_mut().remaining() < bytes.len() as u64 {
            return Err(StorageError::ShardExhausted);
        }
        let index = self.active_mut().index;
        let (offset, len) = self.active_mut().append(bytes)?;
        Ok(Chunk::File {
            shard_index: index,
            offset,
            len,
        })
    }

    fn read_chunk(&self, shard_index: u32, offset: u64, len: u32) -> Result<Vec<u8>> {
        self.shard_by_index(shard_index)?.read(offset, len)
    }
}

/// In-memory shard backend used by storage modes that disable file
/// backing and by tests that don't want filesystem dependencies.
#[derive(Default)]
pub struct MemoryShardBackend;

impl ShardBackend for MemoryShardBackend {
    fn write_chunk(&mut self, _bytes: &[u8], _now_ms: u64) -> Result<Chunk> {
        Err(StorageError::ShardIo(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory storage mode does not back chunks with shards",
        )))
    }

    fn read_chunk(&self, _shard_index: u32, _offset: u64, _len: u32) -> Result<Vec<u8>> {
        Err(StorageError::ShardIo(io::Error::new(
            io::ErrorKind::Unsupported,
            "memory storage mode does not back chunks with shards",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_and_reads_back_a_chunk() {
        let dir = tempdir().unwrap();
        let mut shards = ShardSet::open(dir.path(), DEFAULT_SHARD_MAX_BYTES, 1_000).unwrap();
        let chunk = shards.write_chunk(b"hello shard", 1_000).unwrap();
        let (shard_index, offset, len) = match chunk {
            Chunk::File { shard_index, offset, len } => (shard_index, offset, len),
            _ => panic!("expected file chunk"),
        };
        let back = shards.read_chunk(shard_index, offset, len).unwrap();
        assert_eq!(back, b"hello shard");
    }

    #[test]
    fn opens_a_new_shard_when_the_active_one_is_full() {
        let dir = tempdir().unwrap();
        let mut shards = ShardSet::open(dir.path(), SHARD_HEADER_LEN + 8, 1_000).unwrap();
        let first = shards.write_chunk(b"12345678", 1_000).unwrap();
        let second = shards.write_chunk(b"more", 1_000).unwrap();
        let first_index = match first {
            Chunk::File { shard_index, .. } => shard_index,
            _ => panic!(),
        };
        let second_index = match second {
            Chunk::File { shard_index, .. } => shard_index,
            _ => panic!(),
        };
        assert_ne!(first_index, second_index);
    }
}
