use std::sync::Arc;

use dcdn_protocol::{ContentRecord, ContentRef};
use tracing::{debug, warn};

use crate::{ChunkCodec, ContentReader, ReadConfig, TransferError};

/// Rebuilds committed objects from the store's read API.
///
/// Small objects come back in one inline read. Larger ones are fetched
/// chunk by chunk in index order and concatenated; any failed chunk fails
/// the whole fetch and no partial bytes are returned.
pub struct RetrievalReconstructor {
    reader: Arc<dyn ContentReader>,
    inline_threshold: u64,
}

impl RetrievalReconstructor {
    pub fn new(reader: Arc<dyn ContentReader>, config: &ReadConfig) -> Self {
        Self {
            reader,
            inline_threshold: config.inline_threshold,
        }
    }

    /// Fetches the object behind `content_ref`.
    pub async fn fetch(&self, content_ref: &ContentRef) -> Result<Vec<u8>, TransferError> {
        let record = self.reader.stat(content_ref).await?;
        self.fetch_record(&record).await
    }

    /// Fetches the object described by `record` and checks its length.
    pub async fn fetch_record(&self, record: &ContentRecord) -> Result<Vec<u8>, TransferError> {
        let content_ref = &record.content_ref;
        let data = if record.size <= self.inline_threshold {
            self.reader.read_inline(content_ref).await?
        } else {
            self.fetch_chunks(content_ref).await?
        };

        let actual = data.len() as u64;
        if actual != record.size {
            warn!(content_ref = %content_ref, declared = record.size, actual, "size mismatch on read-back");
            return Err(TransferError::SizeMismatch {
                content_ref: content_ref.clone(),
                declared: record.size,
                actual,
            });
        }
        Ok(data)
    }

    async fn fetch_chunks(&self, content_ref: &ContentRef) -> Result<Vec<u8>, TransferError> {
        let count = self.reader.chunk_count(content_ref).await?;
        let mut chunks = Vec::with_capacity(count as usize);
        for index in 0..count {
            let chunk = self
                .reader
                .get_chunk(content_ref, index)
                .await
                .map_err(|e| TransferError::ChunkFetch {
                    content_ref: content_ref.clone(),
                    index,
                    reason: e.to_string(),
                })?;
            chunks.push(chunk);
        }
        debug!(content_ref = %content_ref, chunks = count, "object reassembled");
        Ok(ChunkCodec::reassemble(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentStore, MemoryContentStore};
    use dcdn_protocol::BoxFuture;
    use std::sync::Mutex;

    fn config(inline_threshold: u64) -> ReadConfig {
        ReadConfig {
            chunk_size: 4,
            inline_threshold,
        }
    }

    /// Reader wrapper that records calls and can fail or corrupt chunks.
    struct ScriptedReader {
        inner: MemoryContentStore,
        fail_index: Option<u64>,
        truncate_last: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedReader {
        fn new() -> Self {
            Self {
                inner: MemoryContentStore::new("mem://t", 4),
                fail_index: None,
                truncate_last: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ContentReader for ScriptedReader {
        fn stat<'a>(
            &'a self,
            content_ref: &'a ContentRef,
        ) -> BoxFuture<'a, Result<ContentRecord, TransferError>> {
            self.log("stat".into());
            self.inner.stat(content_ref)
        }

        fn read_inline<'a>(
            &'a self,
            content_ref: &'a ContentRef,
        ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
            self.log("inline".into());
            self.inner.read_inline(content_ref)
        }

        fn chunk_count<'a>(
            &'a self,
            content_ref: &'a ContentRef,
        ) -> BoxFuture<'a, Result<u64, TransferError>> {
            self.log("count".into());
            self.inner.chunk_count(content_ref)
        }

        fn get_chunk<'a>(
            &'a self,
            content_ref: &'a ContentRef,
            index: u64,
        ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
            self.log(format!("chunk {index}"));
            Box::pin(async move {
                if self.fail_index == Some(index) {
                    return Err(TransferError::Transport("connection reset".into()));
                }
                let mut chunk = self.inner.get_chunk(content_ref, index).await?;
                let count = self.inner.chunk_count(content_ref).await?;
                if self.truncate_last && index + 1 == count {
                    chunk.pop();
                }
                Ok(chunk)
            })
        }
    }

    async fn stored(reader: &ScriptedReader, data: &[u8]) -> ContentRecord {
        reader
            .inner
            .put("/a.bin", data, "application/octet-stream")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn small_object_is_read_inline() {
        let reader = Arc::new(ScriptedReader::new());
        let record = stored(&reader, b"tiny").await;
        let r = RetrievalReconstructor::new(reader.clone(), &config(8));

        assert_eq!(r.fetch_record(&record).await.unwrap(), b"tiny");
        assert_eq!(*reader.calls.lock().unwrap(), vec!["inline"]);
    }

    #[tokio::test]
    async fn large_object_is_fetched_in_index_order() {
        let reader = Arc::new(ScriptedReader::new());
        let record = stored(&reader, b"AABBCCDDEE").await;
        let r = RetrievalReconstructor::new(reader.clone(), &config(4));

        assert_eq!(r.fetch(&record.content_ref).await.unwrap(), b"AABBCCDDEE");
        assert_eq!(
            *reader.calls.lock().unwrap(),
            vec!["stat", "count", "chunk 0", "chunk 1", "chunk 2"]
        );
    }

    #[tokio::test]
    async fn failed_chunk_names_its_index() {
        let mut scripted = ScriptedReader::new();
        scripted.fail_index = Some(1);
        let reader = Arc::new(scripted);
        let record = stored(&reader, b"AABBCCDDEE").await;
        let r = RetrievalReconstructor::new(reader.clone(), &config(0));

        let err = r.fetch_record(&record).await.unwrap_err();
        assert!(matches!(err, TransferError::ChunkFetch { index: 1, .. }));
        assert!(err.is_retryable());
        // Nothing after the failed chunk is requested.
        assert!(!reader.calls.lock().unwrap().contains(&"chunk 2".to_string()));
    }

    #[tokio::test]
    async fn short_read_is_size_mismatch() {
        let mut scripted = ScriptedReader::new();
        scripted.truncate_last = true;
        let reader = Arc::new(scripted);
        let record = stored(&reader, b"AABBCCDDEE").await;
        let r = RetrievalReconstructor::new(reader, &config(0));

        assert!(matches!(
            r.fetch_record(&record).await,
            Err(TransferError::SizeMismatch { declared: 10, actual: 9, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_ref_is_not_found() {
        let reader = Arc::new(ScriptedReader::new());
        let r = RetrievalReconstructor::new(reader, &config(8));
        assert!(matches!(
            r.fetch(&ContentRef::new("missing")).await,
            Err(TransferError::NotFound(_))
        ));
    }
}
