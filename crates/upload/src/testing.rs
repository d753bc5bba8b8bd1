//! Shared test doubles for the upload crate.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dcdn_protocol::{BoxFuture, ContentRecord, SessionState, SigningContext};
use dcdn_registry::{MemoryRegistry, RegistryReflector};
use dcdn_transfer::{
    MemoryContentStore, SessionConfig, SessionInfo, SessionManager, StartRequest, TransferError,
    TransferService,
};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::table::ItemTable;

/// Transfer service over a real [`SessionManager`] that records every call
/// and can inject delays, failures, and cancellation.
pub struct TestService {
    pub store: Arc<MemoryContentStore>,
    inner: SessionManager,
    calls: Mutex<Vec<String>>,
    fail_commit: bool,
    panic_on_put: bool,
    cancel_on_append: Option<(CancellationToken, u64)>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for TestService {
    fn default() -> Self {
        let store = Arc::new(MemoryContentStore::default());
        Self {
            inner: SessionManager::new(store.clone(), SessionConfig::default()),
            store,
            calls: Mutex::new(Vec::new()),
            fail_commit: false,
            panic_on_put: false,
            cancel_on_append: None,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl TestService {
    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    /// `put_object` panics, taking down the task that called it.
    pub fn panicking_put() -> Self {
        Self {
            panic_on_put: true,
            ..Self::default()
        }
    }

    /// Cancels `token` while the append at `offset` is in flight.
    pub fn cancelling_on_append(token: CancellationToken, offset: u64) -> Self {
        Self {
            cancel_on_append: Some((token, offset)),
            ..Self::default()
        }
    }

    /// Every call takes `delay` before reaching the session manager.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose verb is `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn tracked<T>(&self, fut: impl Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let out = fut.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

impl TransferService for TestService {
    fn start<'a>(
        &'a self,
        ctx: &'a SigningContext,
        req: StartRequest,
    ) -> BoxFuture<'a, Result<SessionInfo, TransferError>> {
        self.record(format!("start {}", req.path));
        Box::pin(self.tracked(self.inner.start(ctx, req)))
    }

    fn append_chunk<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, TransferError>> {
        self.record(format!("append {path} {offset}"));
        Box::pin(self.tracked(async move {
            if let Some((token, at)) = &self.cancel_on_append
                && *at == offset
            {
                token.cancel();
            }
            self.inner.append_chunk(ctx, path, offset, data).await
        }))
    }

    fn commit<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>> {
        self.record(format!("commit {path}"));
        Box::pin(self.tracked(async move {
            if self.fail_commit {
                return Err(TransferError::Store("injected commit failure".into()));
            }
            self.inner.commit(ctx, path).await
        }))
    }

    fn abort<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
    ) -> BoxFuture<'a, Result<SessionState, TransferError>> {
        self.record(format!("abort {path}"));
        Box::pin(self.tracked(self.inner.abort(ctx, path)))
    }

    fn put_object<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
        content: &'a [u8],
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>> {
        self.record(format!("put {path}"));
        Box::pin(self.tracked(async move {
            if self.panic_on_put {
                panic!("injected put panic");
            }
            self.inner.put_object(ctx, path, content, content_type).await
        }))
    }
}

/// A service, registry, reflector, and table wired together for one principal.
pub struct Harness {
    pub service: Arc<TestService>,
    pub registry: Arc<MemoryRegistry>,
    pub reflector: Arc<RegistryReflector>,
    pub table: Arc<ItemTable>,
}

impl Harness {
    pub fn new(service: TestService) -> Self {
        let registry = Arc::new(MemoryRegistry::new(service.store.clone()));
        let reflector = Arc::new(RegistryReflector::new(
            registry.clone(),
            SigningContext::anonymous("alice"),
        ));
        Self {
            service: Arc::new(service),
            registry,
            reflector,
            table: Arc::new(ItemTable::new()),
        }
    }
}
