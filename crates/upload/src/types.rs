//! Data types for the upload flow.

use std::path::PathBuf;
use std::sync::Arc;

use dcdn_protocol::{ContentRecord, ContentRef, ItemState, MetadataEntry, infer_content_type};
use serde::{Deserialize, Serialize};

/// Where an item's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// A local file, read in chunks at upload time.
    Path(PathBuf),
    /// Bytes already in memory.
    Bytes(Arc<[u8]>),
}

/// One unit of upload work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub id: String,
    pub source: ItemSource,
    pub target_path: String,
    /// Size in bytes; for files this is the size observed at scan time.
    pub size: u64,
    pub content_type: String,
}

impl UploadItem {
    /// Item for a local file of known size.
    pub fn from_file(path: impl Into<PathBuf>, target_path: impl Into<String>, size: u64) -> Self {
        let target_path = target_path.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_type: infer_content_type(&target_path).to_string(),
            source: ItemSource::Path(path.into()),
            target_path,
            size,
        }
    }

    /// Item for in-memory bytes.
    pub fn from_bytes(target_path: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let target_path = target_path.into();
        let data: Arc<[u8]> = data.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_type: infer_content_type(&target_path).to_string(),
            size: data.len() as u64,
            source: ItemSource::Bytes(data),
            target_path,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Progress event emitted during a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The item left the pending queue.
    Started {
        item_id: String,
        target_path: String,
        total_bytes: u64,
    },
    /// A chunk was acknowledged.
    Progress {
        item_id: String,
        transferred_bytes: u64,
        total_bytes: u64,
    },
    Registered {
        item_id: String,
        content_ref: ContentRef,
        size: u64,
    },
    Failed { item_id: String, error: String },
    Cancelled { item_id: String },
}

impl UploadEvent {
    pub fn item_id(&self) -> &str {
        match self {
            Self::Started { item_id, .. }
            | Self::Progress { item_id, .. }
            | Self::Registered { item_id, .. }
            | Self::Failed { item_id, .. }
            | Self::Cancelled { item_id } => item_id,
        }
    }
}

/// Final result for one item.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub item_id: String,
    pub target_path: String,
    pub state: ItemState,
    pub record: Option<ContentRecord>,
    pub entry: Option<MetadataEntry>,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn registered(item: &UploadItem, record: ContentRecord, entry: MetadataEntry) -> Self {
        Self {
            item_id: item.id.clone(),
            target_path: item.target_path.clone(),
            state: ItemState::Registered,
            record: Some(record),
            entry: Some(entry),
            error: None,
        }
    }

    pub fn failed(item: &UploadItem, error: String) -> Self {
        Self {
            item_id: item.id.clone(),
            target_path: item.target_path.clone(),
            state: ItemState::Failed,
            record: None,
            entry: None,
            error: Some(error),
        }
    }

    pub fn cancelled(item: &UploadItem) -> Self {
        Self {
            item_id: item.id.clone(),
            target_path: item.target_path.clone(),
            state: ItemState::Cancelled,
            record: None,
            entry: None,
            error: None,
        }
    }
}

/// Tuning for one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadConfig {
    /// Maximum items in flight at once.
    pub concurrency: usize,
    /// Bytes per appended chunk.
    pub chunk_size: usize,
    /// Items strictly smaller than this go through a single `put_object`.
    pub single_shot_threshold: u64,
    /// Capacity of the event channel; events beyond it are dropped.
    pub event_buffer: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            chunk_size: dcdn_transfer::DEFAULT_CHUNK_SIZE,
            single_shot_threshold: 2 * 1024 * 1024,
            event_buffer: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_get_unique_ids_and_inferred_types() {
        let a = UploadItem::from_bytes("/assets/a.css", b"body{}".to_vec());
        let b = UploadItem::from_bytes("/assets/b.bin", b"x".to_vec());
        assert_ne!(a.id, b.id);
        assert_eq!(a.content_type, "text/css");
        assert_eq!(a.size, 6);
        assert_eq!(b.content_type, "application/octet-stream");

        let c = b.with_content_type("image/png");
        assert_eq!(c.content_type, "image/png");
    }

    #[test]
    fn upload_config_defaults_from_partial_json() {
        let cfg: UploadConfig = serde_json::from_str(r#"{"concurrency": 5}"#).unwrap();
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.chunk_size, dcdn_transfer::DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.single_shot_threshold, 2 * 1024 * 1024);
    }

    #[test]
    fn event_item_id() {
        let e = UploadEvent::Cancelled {
            item_id: "i1".into(),
        };
        assert_eq!(e.item_id(), "i1");
    }
}
