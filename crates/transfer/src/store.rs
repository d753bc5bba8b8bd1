use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use dcdn_protocol::{BoxFuture, ContentRecord, ContentRef};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ChunkCodec, DEFAULT_CHUNK_SIZE, TransferError, checksum_bytes};

/// Durable destination for committed objects.
pub trait ContentStore: Send + Sync {
    /// Stores `content` and returns its record. The whole object becomes
    /// visible at once or not at all.
    fn put<'a>(
        &'a self,
        location: &'a str,
        content: &'a [u8],
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>>;
}

/// Read side of the content store.
///
/// Unknown references yield [`TransferError::NotFound`]; an index past the
/// last chunk yields [`TransferError::IndexOutOfRange`].
pub trait ContentReader: Send + Sync {
    fn stat<'a>(
        &'a self,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>>;

    /// Reads the whole object in one request.
    fn read_inline<'a>(
        &'a self,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>>;

    fn chunk_count<'a>(
        &'a self,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<u64, TransferError>>;

    fn get_chunk<'a>(
        &'a self,
        content_ref: &'a ContentRef,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>>;
}

/// Retrieval tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadConfig {
    /// Chunk size the store serves multi-chunk objects in.
    pub chunk_size: usize,
    /// Objects at or below this size are fetched in one request.
    pub inline_threshold: u64,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inline_threshold: DEFAULT_CHUNK_SIZE as u64,
        }
    }
}

struct StoredObject {
    record: ContentRecord,
    data: Arc<[u8]>,
}

/// Content-addressed in-process store.
///
/// References are the SHA-256 of the content, so identical bytes map to the
/// same reference and record no matter where they were committed.
pub struct MemoryContentStore {
    base: String,
    codec: ChunkCodec,
    objects: RwLock<HashMap<ContentRef, StoredObject>>,
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new("mem://content", DEFAULT_CHUNK_SIZE)
    }
}

impl MemoryContentStore {
    pub fn new(base: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            base: base.into(),
            codec: ChunkCodec::new(chunk_size),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.codec.chunk_size()
    }

    /// Number of distinct objects held.
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, content_ref: &ContentRef) -> bool {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(content_ref)
    }

    fn insert(&self, content: &[u8], content_type: &str) -> ContentRecord {
        let content_ref = ContentRef::new(checksum_bytes(content));
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = objects.get(&content_ref) {
            debug!(content_ref = %content_ref, "content already stored");
            return existing.record.clone();
        }

        let record = ContentRecord {
            location: format!("{}/{}", self.base, content_ref),
            content_ref: content_ref.clone(),
            size: content.len() as u64,
            content_type: content_type.to_string(),
        };
        objects.insert(
            content_ref,
            StoredObject {
                record: record.clone(),
                data: Arc::from(content),
            },
        );
        record
    }

    fn object(&self, content_ref: &ContentRef) -> Result<(ContentRecord, Arc<[u8]>), TransferError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(content_ref)
            .map(|o| (o.record.clone(), Arc::clone(&o.data)))
            .ok_or_else(|| TransferError::NotFound(content_ref.to_string()))
    }
}

impl ContentStore for MemoryContentStore {
    fn put<'a>(
        &'a self,
        location: &'a str,
        content: &'a [u8],
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>> {
        Box::pin(async move {
            if content.is_empty() {
                return Err(TransferError::EmptyContent);
            }
            let record = self.insert(content, content_type);
            debug!(location, content_ref = %record.content_ref, size = record.size, "object stored");
            Ok(record)
        })
    }
}

impl ContentReader for MemoryContentStore {
    fn stat<'a>(
        &'a self,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>> {
        Box::pin(async move { self.object(content_ref).map(|(record, _)| record) })
    }

    fn read_inline<'a>(
        &'a self,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        Box::pin(async move { self.object(content_ref).map(|(_, data)| data.to_vec()) })
    }

    fn chunk_count<'a>(
        &'a self,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        Box::pin(async move {
            let (record, _) = self.object(content_ref)?;
            Ok(self.codec.chunk_count(record.size))
        })
    }

    fn get_chunk<'a>(
        &'a self,
        content_ref: &'a ContentRef,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            let (record, data) = self.object(content_ref)?;
            let count = self.codec.chunk_count(record.size);
            if index >= count {
                return Err(TransferError::IndexOutOfRange { index, count });
            }
            let size = self.codec.chunk_size();
            let start = index as usize * size;
            let end = (start + size).min(data.len());
            Ok(data[start..end].to_vec())
        })
    }
}
