//! Upload batch flow: scan, transfer, register.
//!
//! This crate implements the **client side** of the ingest pipeline. It is
//! a library with no transport of its own: callers hand it a
//! [`TransferService`](dcdn_transfer::TransferService) and a
//! [`MetadataRegistry`](dcdn_registry::MetadataRegistry), and it drives a
//! batch of items through them.
//!
//! # Pipeline (per item)
//!
//! 1. **Transfer**: one `put_object` for items below the single-shot
//!    threshold, otherwise start / append each chunk / commit
//! 2. **Register**: record the committed content in the registry
//! 3. **Refresh**: re-list the registry so the local view matches
//!
//! Any failure after a session was opened aborts that session before the
//! item is marked failed.

pub mod error;
pub mod orchestrator;
pub mod scanner;
pub mod table;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{Stage, UploadError};
pub use orchestrator::UploadOrchestrator;
pub use scanner::{DEFAULT_TARGET_PREFIX, items_from_paths, scan_items};
pub use table::ItemTable;
pub use types::{ItemSource, UploadConfig, UploadEvent, UploadItem, UploadOutcome};
pub use worker::ItemWorker;
