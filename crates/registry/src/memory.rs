use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use dcdn_protocol::{BoxFuture, ContentRef, MetadataEntry, SigningContext};
use dcdn_transfer::{ContentReader, TransferError};
use tracing::{debug, info};

use crate::{MetadataRegistry, NewEntry, RegistryError};

/// In-process registry backed by a content reader.
///
/// Registration checks that the reference resolves in the store so the
/// registry never points at bytes that do not exist. Names form one
/// namespace across principals; each name maps to at most one entry.
pub struct MemoryRegistry {
    reader: Arc<dyn ContentReader>,
    entries: RwLock<Vec<MetadataEntry>>,
}

impl MemoryRegistry {
    pub fn new(reader: Arc<dyn ContentReader>) -> Self {
        Self {
            reader,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Total entries across all principals.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataRegistry for MemoryRegistry {
    fn register<'a>(
        &'a self,
        ctx: &'a SigningContext,
        entry: NewEntry,
    ) -> BoxFuture<'a, Result<MetadataEntry, RegistryError>> {
        Box::pin(async move {
            match self.reader.stat(&entry.content_ref).await {
                Ok(_) => {}
                Err(TransferError::NotFound(_)) => {
                    return Err(RegistryError::InvalidContentRef(entry.content_ref));
                }
                Err(e) => return Err(RegistryError::Backend(e.to_string())),
            }

            let owner = ctx.principal();
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let existing = entries.iter().position(|e| e.name == entry.name);
            if let Some(i) = existing
                && entries[i].owner != owner
            {
                return Err(RegistryError::AlreadyExists(entry.name));
            }

            let created = MetadataEntry {
                name: entry.name,
                content_ref: entry.content_ref,
                size: entry.size,
                content_type: entry.content_type,
                owner: owner.to_string(),
                created_at: Utc::now(),
            };
            match existing {
                Some(i) => {
                    info!(name = %created.name, previous = %entries[i].content_ref, content_ref = %created.content_ref, "entry replaced");
                    entries[i] = created.clone();
                }
                None => {
                    debug!(name = %created.name, content_ref = %created.content_ref, "entry registered");
                    entries.push(created.clone());
                }
            }
            Ok(created)
        })
    }

    fn list<'a>(
        &'a self,
        ctx: &'a SigningContext,
    ) -> BoxFuture<'a, Result<Vec<MetadataEntry>, RegistryError>> {
        Box::pin(async move {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            Ok(entries
                .iter()
                .filter(|e| e.owner == ctx.principal())
                .cloned()
                .collect())
        })
    }

    fn remove<'a>(
        &'a self,
        ctx: &'a SigningContext,
        content_ref: &'a ContentRef,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            entries.retain(|e| !(e.owner == ctx.principal() && &e.content_ref == content_ref));
            if entries.len() == before {
                return Err(RegistryError::NotFound(content_ref.clone()));
            }
            Ok(())
        })
    }
}
