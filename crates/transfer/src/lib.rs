//! Chunked transfer sessions, content storage seams, and read-back.
//!
//! The server side of the ingest protocol lives here: a [`SessionManager`]
//! keyed by target path that accepts strictly sequential chunk appends and
//! commits them atomically into a [`ContentStore`]. The client side talks to
//! it through the [`TransferService`] trait, and committed objects are read
//! back through a [`RetrievalReconstructor`].

mod chunked;
mod manager;
mod reconstruct;
mod service;
mod session;
mod store;
mod validation;

use dcdn_protocol::ContentRef;

pub use chunked::{Chunk, ChunkCodec, ChunkReader, ChunkSlice, checksum_bytes};
pub use manager::{SessionConfig, SessionManager, SweepReport};
pub use reconstruct::RetrievalReconstructor;
pub use service::{StartRequest, TransferService};
pub use session::{SessionInfo, TransferSession};
pub use store::{ContentReader, ContentStore, MemoryContentStore, ReadConfig};
pub use validation::validate_target_path;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a session is already active for {0}")]
    SessionConflict(String),

    #[error("invalid offset for {path}: expected {expected}, got {actual}")]
    InvalidOffset {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("incomplete upload for {path}: declared {declared} bytes, received {received}")]
    Incomplete {
        path: String,
        declared: u64,
        received: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chunk {index} of {content_ref} could not be fetched: {reason}")]
    ChunkFetch {
        content_ref: ContentRef,
        index: u64,
        reason: String,
    },

    #[error("chunk index {index} out of range ({count} chunks)")]
    IndexOutOfRange { index: u64, count: u64 },

    #[error("size mismatch for {content_ref}: declared {declared}, got {actual}")]
    SizeMismatch {
        content_ref: ContentRef,
        declared: u64,
        actual: u64,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("content cannot be empty")]
    EmptyContent,

    #[error("object too large: {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl TransferError {
    /// Returns `true` if re-invoking the whole operation may succeed.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ChunkFetch { .. } | Self::Store(_) | Self::SessionConflict(_)
        )
    }
}
