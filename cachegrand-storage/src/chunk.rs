//! Value storage: in-memory or shard-backed chunks, chained when a value
//! exceeds [`CHUNK_MAX`].

use std::sync::Arc;

/// Maximum bytes carried by a single chunk; larger values become a chain.
pub const CHUNK_MAX: usize = 64 * 1024;

/// One piece of a value. Memory chunks own their bytes directly; file
/// chunks point into a per-worker shard by (shard index, offset, length).
#[derive(Debug, Clone)]
pub enum Chunk {
    Memory(Arc<[u8]>),
    File {
        shard_index: u32,
        offset: u64,
        len: u32,
    },
}

impl Chunk {
    pub fn memory(bytes: &[u8]) -> Self {
        Chunk::Memory(Arc::from(bytes))
    }

    pub fn len(&self) -> usize {
        match self {
            Chunk::Memory(b) => b.len(),
            Chunk::File { len, .. } => *len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered, append-only list of chunks making up one value (or key).
#[derive(Debug, Clone, Default)]
pub struct ChunkChain {
    chunks: Vec<Chunk>,
}

impl ChunkChain {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Splits `bytes` into `CHUNK_MAX`-sized memory chunks.
    pub fn from_memory(bytes: &[u8]) -> Self {
        let mut chunks = Vec::with_capacity(bytes.len() / CHUNK_MAX + 1);
        for piece in bytes.chunks(CHUNK_MAX) {
            chunks.push(Chunk::memory(piece));
        }
        if chunks.is_empty() {
            chunks.push(Chunk::memory(&[]));
        }
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Materializes the full value by concatenating every chunk. File
    /// chunks must already have been resolved by the caller into memory
    /// chunks (or this chain contains only memory chunks); shard reads
    /// happen at the call site via [`crate::shard::ShardSet`].
    pub fn to_vec_memory_only(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for chunk in &self.chunks {
            if let Chunk::Memory(bytes) = chunk {
                out.extend_from_slice(bytes);
            }
        }
        out
    }

    /// Appends `suffix` to the chain: extends the last memory chunk in
    /// place if it has spare capacity under `CHUNK_MAX`, otherwise
    /// allocates new chunks. Matches spec's append semantics for the
    /// in-memory storage mode.
    pub fn append_memory(&mut self, suffix: &[u8]) {
        let mut remaining = suffix;

        if let Some(Chunk::Memory(last)) = self.chunks.last_mut() {
            let spare = CHUNK_MAX.saturating_sub(last.len());
            if spare > 0 && !remaining.is_empty() {
                let take = spare.min(remaining.len());
                let mut extended = Vec::with_capacity(last.len() + take);
                extended.extend_from_slice(last);
                extended.extend_from_slice(&remaining[..take]);
                *last = Arc::from(extended.into_boxed_slice());
                remaining = &remaining[take..];
            }
        }

        for piece in remaining.chunks(CHUNK_MAX) {
            self.chunks.push(Chunk::memory(piece));
        }
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_large_values_into_chunk_max_pieces() {
        let value = vec![7u8; CHUNK_MAX * 2 + 10];
        let chain = ChunkChain::from_memory(&value);
        assert_eq!(chain.chunks().len(), 3);
        assert_eq!(chain.total_len(), value.len());
        assert_eq!(chain.to_vec_memory_only(), value);
    }

    #[test]
    fn append_extends_last_chunk_in_place_when_it_fits() {
        let mut chain = ChunkChain::from_memory(b"hello");
        chain.append_memory(b" world");
        assert_eq!(chain.chunks().len(), 1);
        assert_eq!(chain.to_vec_memory_only(), b"hello world");
    }

    #[test]
    fn append_allocates_new_chunk_when_last_is_full() {
        let mut chain = ChunkChain::from_memory(&vec![1u8; CHUNK_MAX]);
        chain.append_memory(b"more");
        assert_eq!(chain.chunks().len(), 2);
        assert_eq!(chain.total_len(), CHUNK_MAX + 4);
    }
}
