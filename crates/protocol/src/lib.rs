//! Shared data model for the dcdn ingest pipeline.
//!
//! Everything that crosses a crate boundary lives here: content
//! references and records produced by the store, metadata entries held by
//! the registry, upload item/session states, and the opaque signing
//! context handed out by the identity source.

pub mod content_type;
pub mod identity;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use content_type::infer_content_type;
pub use identity::{IdentityError, IdentitySource, SigningContext, StaticIdentity};
pub use types::{
    BatchStatus, ContentRecord, ContentRef, ItemProgress, ItemState, MetadataEntry, SessionState,
};

/// A boxed, sendable future used at every async trait seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
