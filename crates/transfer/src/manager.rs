use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use dcdn_protocol::{BoxFuture, ContentRecord, SessionState, SigningContext, infer_content_type};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    ContentStore, SessionInfo, StartRequest, TransferError, TransferService, TransferSession,
    validate_target_path,
};

type Slot = Arc<Mutex<TransferSession>>;

/// Session lifecycle limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Seconds without an append before an active session is reclaimed.
    pub idle_timeout_secs: u64,
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds a finished session is kept so abort stays idempotent.
    pub tombstone_retention_secs: u64,
    /// Upper bound on one object, in bytes.
    pub max_object_size: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
            tombstone_retention_secs: 600,
            max_object_size: 512 * 1024 * 1024,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_secs)
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle sessions moved to Aborted.
    pub reclaimed: usize,
    /// Finished sessions dropped from the table.
    pub purged: usize,
}

/// Path-keyed table of transfer sessions in front of a [`ContentStore`].
///
/// Each path holds at most one session at a time. Operations on one path
/// are serialized by that session's lock; different paths never contend
/// beyond the brief table lookup.
pub struct SessionManager {
    sessions: std::sync::Mutex<HashMap<String, Slot>>,
    store: Arc<dyn ContentStore>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ContentStore>, config: SessionConfig) -> Self {
        Self {
            sessions: std::sync::Mutex::new(HashMap::new()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, path: &str) -> Option<Slot> {
        self.table().get(path).cloned()
    }

    /// Looks up the session for `path` as seen by `principal`.
    ///
    /// Sessions owned by someone else are reported as missing.
    async fn owned_slot(
        &self,
        principal: &str,
        path: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<TransferSession>, TransferError> {
        let slot = self
            .slot(path)
            .ok_or_else(|| TransferError::NotFound(path.to_string()))?;
        let session = slot.lock_owned().await;
        if session.owner() != principal {
            return Err(TransferError::NotFound(path.to_string()));
        }
        Ok(session)
    }

    fn check_size(&self, size: u64) -> Result<(), TransferError> {
        if size > self.config.max_object_size {
            return Err(TransferError::TooLarge {
                size,
                limit: self.config.max_object_size,
            });
        }
        Ok(())
    }

    /// Opens a session for `req.path`.
    ///
    /// Fails with [`TransferError::SessionConflict`] while another session on
    /// the same path is active or busy. A finished session on the path is
    /// replaced.
    pub async fn start(
        &self,
        ctx: &SigningContext,
        req: StartRequest,
    ) -> Result<SessionInfo, TransferError> {
        validate_target_path(&req.path)?;
        if let Some(size) = req.declared_size {
            self.check_size(size)?;
        }

        let content_type = req
            .content_type
            .unwrap_or_else(|| infer_content_type(&req.path).to_string());
        let session = TransferSession::open(
            req.path.clone(),
            ctx.principal(),
            req.declared_size,
            content_type,
        );
        let info = session.info();

        let mut table = self.table();
        if let Some(existing) = table.get(&req.path) {
            let busy = existing
                .try_lock()
                .map(|s| s.state().is_active())
                .unwrap_or(true);
            if busy {
                return Err(TransferError::SessionConflict(req.path));
            }
        }
        table.insert(req.path.clone(), Arc::new(Mutex::new(session)));
        drop(table);

        debug!(path = %info.path, declared_size = ?info.declared_size, "session opened");
        Ok(info)
    }

    /// Appends one chunk at `offset`, returning the cumulative length.
    pub async fn append_chunk(
        &self,
        ctx: &SigningContext,
        path: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, TransferError> {
        let mut session = self.owned_slot(ctx.principal(), path).await?;
        session.append(offset, data, self.config.max_object_size)
    }

    /// Commits the session's bytes into the store as one object.
    ///
    /// The session lock is held across the store write, so a concurrent
    /// append or abort on the same path waits for the outcome. If the store
    /// fails the session stays active and the client decides whether to abort.
    pub async fn commit(
        &self,
        ctx: &SigningContext,
        path: &str,
    ) -> Result<ContentRecord, TransferError> {
        let mut session = self.owned_slot(ctx.principal(), path).await?;
        session.ensure_committable()?;

        let record = self
            .store
            .put(session.path(), session.content(), session.content_type())
            .await?;
        session.mark_committed();

        info!(path, content_ref = %record.content_ref, size = record.size, "session committed");
        Ok(record)
    }

    /// Aborts the session for `path` and returns the state it ends in.
    ///
    /// Aborting a finished session reports its final state without change.
    pub async fn abort(
        &self,
        ctx: &SigningContext,
        path: &str,
    ) -> Result<SessionState, TransferError> {
        let mut session = self.owned_slot(ctx.principal(), path).await?;
        let before = session.state();
        let after = session.abort();
        if before != after {
            debug!(path, "session aborted");
        }
        Ok(after)
    }

    /// Stores a small object in one call.
    pub async fn put_object(
        &self,
        _ctx: &SigningContext,
        path: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<ContentRecord, TransferError> {
        validate_target_path(path)?;
        if content.is_empty() {
            return Err(TransferError::EmptyContent);
        }
        self.check_size(content.len() as u64)?;

        if let Some(slot) = self.slot(path) {
            let active = slot
                .try_lock()
                .map(|s| s.state().is_active())
                .unwrap_or(true);
            if active {
                return Err(TransferError::SessionConflict(path.to_string()));
            }
        }

        let record = self.store.put(path, content, content_type).await?;
        info!(path, content_ref = %record.content_ref, size = record.size, "object stored");
        Ok(record)
    }

    /// Snapshot of the session on `path`, if any.
    pub fn session_info(&self, path: &str) -> Option<SessionInfo> {
        let slot = self.slot(path)?;
        let session = slot.try_lock().ok()?;
        Some(session.info())
    }

    /// Number of sessions currently accepting chunks.
    pub fn active_sessions(&self) -> usize {
        let slots: Vec<Slot> = self.table().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| {
                slot.try_lock()
                    .map(|s| s.state().is_active())
                    .unwrap_or(true)
            })
            .count()
    }

    /// Reclaims idle sessions and drops expired tombstones.
    ///
    /// Sessions whose lock is held are skipped for this pass.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let timeout = self.config.idle_timeout();
        let retention = self.config.tombstone_retention();
        let mut report = SweepReport::default();

        let slots: Vec<(String, Slot)> = self
            .table()
            .iter()
            .map(|(path, slot)| (path.clone(), Arc::clone(slot)))
            .collect();

        let mut expired = Vec::new();
        for (path, slot) in slots {
            let Ok(mut session) = slot.try_lock() else {
                continue;
            };
            if session.is_idle(now, timeout) {
                warn!(
                    path = %path,
                    owner = session.owner(),
                    received = session.received_bytes(),
                    "reclaiming idle session"
                );
                session.abort();
                report.reclaimed += 1;
            } else if session.is_expired_tombstone(now, retention) {
                drop(session);
                expired.push((path, slot));
            }
        }

        if !expired.is_empty() {
            let mut table = self.table();
            for (path, slot) in expired {
                // A new session may have replaced the tombstone meanwhile.
                if table.get(&path).is_some_and(|cur| Arc::ptr_eq(cur, &slot)) {
                    table.remove(&path);
                    report.purged += 1;
                }
            }
        }

        if report != SweepReport::default() {
            debug!(reclaimed = report.reclaimed, purged = report.purged, "session sweep");
        }
        report
    }

    /// Spawns a background task that sweeps on the configured interval.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep();
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }
}

impl TransferService for SessionManager {
    fn start<'a>(
        &'a self,
        ctx: &'a SigningContext,
        req: StartRequest,
    ) -> BoxFuture<'a, Result<SessionInfo, TransferError>> {
        Box::pin(SessionManager::start(self, ctx, req))
    }

    fn append_chunk<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        Box::pin(SessionManager::append_chunk(self, ctx, path, offset, data))
    }

    fn commit<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>> {
        Box::pin(SessionManager::commit(self, ctx, path))
    }

    fn abort<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
    ) -> BoxFuture<'a, Result<SessionState, TransferError>> {
        Box::pin(SessionManager::abort(self, ctx, path))
    }

    fn put_object<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
        content: &'a [u8],
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>> {
        Box::pin(SessionManager::put_object(self, ctx, path, content, content_type))
    }
}
