//! Metadata registry: named pointers to committed content.
//!
//! The [`MetadataRegistry`] trait is the remote seam; [`MemoryRegistry`] is
//! the in-process backend. A [`RegistryReflector`] keeps a local read-only
//! view of one principal's entries current after every mutation.

mod memory;
mod reflector;

use dcdn_protocol::{BoxFuture, ContentRef, MetadataEntry, SigningContext};

pub use memory::MemoryRegistry;
pub use reflector::{RegistryReflector, RegistryStats};

/// Errors produced by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} is already registered by another principal")]
    AlreadyExists(String),

    #[error("content reference does not resolve: {0}")]
    InvalidContentRef(ContentRef),

    #[error("no entry for {0}")]
    NotFound(ContentRef),

    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Fields supplied when registering committed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub name: String,
    pub content_ref: ContentRef,
    pub size: u64,
    pub content_type: String,
}

/// Persistent index of content entries, scoped by principal.
pub trait MetadataRegistry: Send + Sync {
    /// Records an entry owned by the caller under `entry.name`.
    ///
    /// Re-registering a name the caller already owns replaces that entry.
    /// A name owned by another principal is rejected with `AlreadyExists`.
    fn register<'a>(
        &'a self,
        ctx: &'a SigningContext,
        entry: NewEntry,
    ) -> BoxFuture<'a, Result<MetadataEntry, RegistryError>>;

    /// Lists the caller's entries in registration order.
    fn list<'a>(
        &'a self,
        ctx: &'a SigningContext,
    ) -> BoxFuture<'a, Result<Vec<MetadataEntry>, RegistryError>>;

    /// Removes every entry of the caller pointing at `content_ref`.
    fn remove<'a>(
        &'a self,
        ctx: &'a SigningContext,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<(), RegistryError>>;
}
