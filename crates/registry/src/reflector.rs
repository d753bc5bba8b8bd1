use std::sync::{Arc, PoisonError, RwLock};

use dcdn_protocol::{ContentRecord, ContentRef, MetadataEntry, SigningContext};
use tracing::{debug, warn};

use crate::{MetadataRegistry, NewEntry, RegistryError};

/// Aggregate over the reflected entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub count: usize,
    pub total_bytes: u64,
}

/// Local read-only view of one principal's registry entries.
///
/// Every mutation through the reflector is followed by a full refresh, so a
/// successful `register` is visible in [`view`](Self::view) as soon as the
/// call returns. Readers never observe a half-updated list.
pub struct RegistryReflector {
    registry: Arc<dyn MetadataRegistry>,
    ctx: SigningContext,
    view: RwLock<Vec<MetadataEntry>>,
}

impl RegistryReflector {
    pub fn new(registry: Arc<dyn MetadataRegistry>, ctx: SigningContext) -> Self {
        Self {
            registry,
            ctx,
            view: RwLock::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &SigningContext {
        &self.ctx
    }

    /// Lists entries directly from the registry without touching the view.
    pub async fn list(&self) -> Result<Vec<MetadataEntry>, RegistryError> {
        self.registry.list(&self.ctx).await
    }

    /// Replaces the view with the registry's current listing.
    ///
    /// On failure the previous view is kept.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let entries = self.registry.list(&self.ctx).await?;
        let count = entries.len();
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = entries;
        debug!(count, "registry view refreshed");
        Ok(count)
    }

    /// Registers committed content under `name`, then refreshes the view.
    ///
    /// If the registration succeeds but the refresh fails, the entry is
    /// returned anyway and the view catches up on the next refresh.
    pub async fn register(
        &self,
        record: &ContentRecord,
        name: &str,
    ) -> Result<MetadataEntry, RegistryError> {
        let entry = self
            .registry
            .register(
                &self.ctx,
                NewEntry {
                    name: name.to_string(),
                    content_ref: record.content_ref.clone(),
                    size: record.size,
                    content_type: record.content_type.clone(),
                },
            )
            .await?;
        if let Err(e) = self.refresh().await {
            warn!(name, error = %e, "registry view refresh failed after register");
        }
        Ok(entry)
    }

    /// Removes the entry for `content_ref`, then refreshes the view.
    pub async fn remove(&self, content_ref: &ContentRef) -> Result<(), RegistryError> {
        self.registry.remove(&self.ctx, content_ref).await?;
        if let Err(e) = self.refresh().await {
            warn!(content_ref = %content_ref, error = %e, "registry view refresh failed after remove");
        }
        Ok(())
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> Vec<MetadataEntry> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> RegistryStats {
        let view = self.view.read().unwrap_or_else(PoisonError::into_inner);
        RegistryStats {
            count: view.len(),
            total_bytes: view.iter().map(|e| e.size).sum(),
        }
    }

    /// Entries in the view registered under `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<MetadataEntry> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }
}
