//! Per-item upload pipeline.

use std::sync::Arc;

use dcdn_protocol::{ContentRecord, ItemState, MetadataEntry, SigningContext};
use dcdn_registry::RegistryReflector;
use dcdn_transfer::{ChunkCodec, ChunkReader, StartRequest, TransferError, TransferService};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Stage, UploadError};
use crate::table::ItemTable;
use crate::types::{ItemSource, UploadConfig, UploadEvent, UploadItem, UploadOutcome};

/// Runs single items through transfer and registration.
///
/// One worker is shared by every task of a batch; all calls use the
/// reflector's signing context.
pub struct ItemWorker {
    transfer: Arc<dyn TransferService>,
    reflector: Arc<RegistryReflector>,
    config: UploadConfig,
    table: Arc<ItemTable>,
    events_tx: mpsc::Sender<UploadEvent>,
}

impl ItemWorker {
    pub fn new(
        transfer: Arc<dyn TransferService>,
        reflector: Arc<RegistryReflector>,
        config: UploadConfig,
        table: Arc<ItemTable>,
        events_tx: mpsc::Sender<UploadEvent>,
    ) -> Self {
        Self {
            transfer,
            reflector,
            config,
            table,
            events_tx,
        }
    }

    fn ctx(&self) -> &SigningContext {
        self.reflector.context()
    }

    /// Processes one item to a terminal state.
    ///
    /// Items cancelled while still pending are reported Cancelled without
    /// any remote call.
    pub async fn process(&self, item: &UploadItem, cancel: &CancellationToken) -> UploadOutcome {
        if cancel.is_cancelled() || !self.table.begin(&item.id) {
            self.table.cancel_pending(&item.id);
            self.emit(UploadEvent::Cancelled {
                item_id: item.id.clone(),
            });
            return UploadOutcome::cancelled(item);
        }

        self.emit(UploadEvent::Started {
            item_id: item.id.clone(),
            target_path: item.target_path.clone(),
            total_bytes: item.size,
        });

        match self.upload(item, cancel).await {
            Ok((record, entry)) => {
                self.table.set_transferred(&item.id, record.size);
                self.table.transition(&item.id, ItemState::Registered);
                self.emit(UploadEvent::Registered {
                    item_id: item.id.clone(),
                    content_ref: record.content_ref.clone(),
                    size: record.size,
                });
                info!(path = %item.target_path, content_ref = %record.content_ref, size = record.size, "item registered");
                UploadOutcome::registered(item, record, entry)
            }
            Err(UploadError::Cancelled) => {
                self.table.transition(&item.id, ItemState::Cancelled);
                self.emit(UploadEvent::Cancelled {
                    item_id: item.id.clone(),
                });
                info!(path = %item.target_path, "item cancelled");
                UploadOutcome::cancelled(item)
            }
            Err(e) => {
                let error = e.to_string();
                self.table.fail(&item.id, error.clone());
                self.emit(UploadEvent::Failed {
                    item_id: item.id.clone(),
                    error: error.clone(),
                });
                warn!(path = %item.target_path, error = %error, "item failed");
                UploadOutcome::failed(item, error)
            }
        }
    }

    async fn upload(
        &self,
        item: &UploadItem,
        cancel: &CancellationToken,
    ) -> Result<(ContentRecord, MetadataEntry), UploadError> {
        let record = if item.size < self.config.single_shot_threshold {
            self.put_single(item, cancel).await?
        } else {
            self.put_chunked(item, cancel).await?
        };
        let entry = self.reflector.register(&record, &item.target_path).await?;
        Ok((record, entry))
    }

    /// One atomic write, no session.
    async fn put_single(
        &self,
        item: &UploadItem,
        cancel: &CancellationToken,
    ) -> Result<ContentRecord, UploadError> {
        let content: Arc<[u8]> = match &item.source {
            ItemSource::Bytes(data) => Arc::clone(data),
            ItemSource::Path(path) => tokio::fs::read(path).await?.into(),
        };
        if content.len() as u64 != item.size {
            return Err(UploadError::Transfer {
                stage: Stage::Read,
                source: TransferError::Incomplete {
                    path: item.target_path.clone(),
                    declared: item.size,
                    received: content.len() as u64,
                },
            });
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.table.transition(&item.id, ItemState::Committing);
        debug!(path = %item.target_path, bytes = content.len(), "single-shot put");
        self.transfer
            .put_object(self.ctx(), &item.target_path, &content, &item.content_type)
            .await
            .map_err(UploadError::at(Stage::Put))
    }

    /// Session-based upload. Once the session is open, any error or
    /// cancellation aborts it exactly once.
    async fn put_chunked(
        &self,
        item: &UploadItem,
        cancel: &CancellationToken,
    ) -> Result<ContentRecord, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let req = StartRequest::new(item.target_path.clone())
            .with_size(item.size)
            .with_content_type(item.content_type.clone());
        self.transfer
            .start(self.ctx(), req)
            .await
            .map_err(UploadError::at(Stage::Start))?;

        let result = self.stream_and_commit(item, cancel).await;
        if result.is_err() {
            self.abort(&item.target_path).await;
        }
        result
    }

    async fn stream_and_commit(
        &self,
        item: &UploadItem,
        cancel: &CancellationToken,
    ) -> Result<ContentRecord, UploadError> {
        match &item.source {
            ItemSource::Bytes(data) => {
                let codec = ChunkCodec::new(self.config.chunk_size);
                for chunk in codec.split(data) {
                    self.send_chunk(item, chunk.offset, chunk.data, cancel).await?;
                }
            }
            ItemSource::Path(path) => {
                let mut reader = ChunkReader::open(path, self.config.chunk_size)
                    .await
                    .map_err(UploadError::at(Stage::Read))?;
                while let Some(chunk) = reader
                    .next_chunk()
                    .await
                    .map_err(UploadError::at(Stage::Read))?
                {
                    self.send_chunk(item, chunk.offset, &chunk.data, cancel).await?;
                }
            }
        }

        // Past this point the commit runs to completion regardless of cancellation.
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        self.table.transition(&item.id, ItemState::Committing);
        self.transfer
            .commit(self.ctx(), &item.target_path)
            .await
            .map_err(UploadError::at(Stage::Commit))
    }

    async fn send_chunk(
        &self,
        item: &UploadItem,
        offset: u64,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let acked = self
            .transfer
            .append_chunk(self.ctx(), &item.target_path, offset, data)
            .await
            .map_err(UploadError::at(Stage::Append))?;

        if cancel.is_cancelled() {
            debug!(path = %item.target_path, offset, "ignoring ack after cancellation");
            return Err(UploadError::Cancelled);
        }

        debug!(path = %item.target_path, offset, bytes = data.len(), acked, "chunk acknowledged");
        self.table.set_transferred(&item.id, acked);
        self.emit(UploadEvent::Progress {
            item_id: item.id.clone(),
            transferred_bytes: acked,
            total_bytes: item.size,
        });
        Ok(())
    }

    async fn abort(&self, path: &str) {
        match self.transfer.abort(self.ctx(), path).await {
            Ok(state) => debug!(path, state = %state, "session aborted"),
            Err(e) => warn!(path, error = %e, "abort failed"),
        }
    }

    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(error = %e, "upload event dropped");
        }
    }
}
