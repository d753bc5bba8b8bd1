use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkCodec
// ---------------------------------------------------------------------------

/// A borrowed piece of a larger buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSlice<'a> {
    pub index: u64,
    pub offset: u64,
    pub data: &'a [u8],
}

/// Splits byte sequences into fixed-size ordered pieces and joins them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCodec {
    chunk_size: usize,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkCodec {
    /// Creates a codec. A `chunk_size` of 0 selects [`DEFAULT_CHUNK_SIZE`].
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks `len` bytes split into (0 for empty input).
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.chunk_size as u64)
    }

    /// Slices `data` into ordered chunks; every chunk but the last is full.
    pub fn split<'a>(&self, data: &'a [u8]) -> impl Iterator<Item = ChunkSlice<'a>> + use<'a> {
        let chunk_size = self.chunk_size;
        data.chunks(chunk_size)
            .enumerate()
            .map(move |(i, piece)| ChunkSlice {
                index: i as u64,
                offset: (i * chunk_size) as u64,
                data: piece,
            })
    }

    /// Concatenates chunks in iteration order.
    pub fn reassemble<I, B>(chunks: I) -> Vec<u8>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(chunk.as_ref());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// An owned chunk read from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u64,
    /// Byte offset within the file.
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Reads a file in fixed-size chunks without loading it whole.
pub struct ChunkReader {
    file: tokio::fs::File,
    chunk_size: usize,
    offset: u64,
    index: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();
        Ok(Self {
            file,
            chunk_size: ChunkCodec::new(chunk_size).chunk_size(),
            offset: 0,
            index: 0,
            file_size,
        })
    }

    /// Reads the next chunk. Returns `None` at EOF.
    ///
    /// A chunk is short only at end of file.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let mut buf = Vec::with_capacity(self.chunk_size.min(self.remaining() as usize));
        (&mut self.file)
            .take(self.chunk_size as u64)
            .read_to_end(&mut buf)
            .await?;
        if buf.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk {
            index: self.index,
            offset: self.offset,
            data: buf,
        };
        self.offset += chunk.data.len() as u64;
        self.index += 1;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size observed at open time.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining relative to the size observed at open time.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}
