//! Upload orchestrator: bounded-concurrency batch runner.
//!
//! A fixed pool of workers pulls items from a shared pending queue. Each
//! item carries a completion signal, so results come back in input order
//! regardless of which worker finished first. Cancellation is cooperative
//! and per item, with a batch-wide parent token.
//!
//! Item state, tokens, and the batch token are replaced at the start of
//! every run, so one batch's cancellation or totals never leak into the
//! next. Batches on one orchestrator run one at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dcdn_protocol::{BatchStatus, IdentitySource, ItemProgress};
use dcdn_registry::{MetadataRegistry, RegistryReflector};
use dcdn_transfer::TransferService;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::UploadError;
use crate::table::ItemTable;
use crate::types::{UploadConfig, UploadEvent, UploadItem, UploadOutcome};
use crate::worker::ItemWorker;

struct Job {
    item: UploadItem,
    cancel: CancellationToken,
    done: oneshot::Sender<UploadOutcome>,
}

/// State scoped to the current or most recent batch.
#[derive(Default)]
struct BatchState {
    table: Arc<ItemTable>,
    cancel: CancellationToken,
    item_tokens: HashMap<String, CancellationToken>,
}

/// Orchestrates a batch of uploads against one transfer service and registry.
pub struct UploadOrchestrator {
    transfer: Arc<dyn TransferService>,
    registry: Arc<dyn MetadataRegistry>,
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    batch: Mutex<BatchState>,
    reflector: Mutex<Option<Arc<RegistryReflector>>>,
}

impl UploadOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(
        transfer: Arc<dyn TransferService>,
        registry: Arc<dyn MetadataRegistry>,
        config: UploadConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            transfer,
            registry,
            config,
            events_tx,
            events_rx: Some(events_rx),
            batch: Mutex::new(BatchState::default()),
            reflector: Mutex::new(None),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    fn batch(&self) -> MutexGuard<'_, BatchState> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-item state for the current or most recent batch.
    pub fn items(&self) -> Vec<ItemProgress> {
        self.batch().table.snapshot()
    }

    /// "K of T complete" over the current or most recent batch.
    pub fn status(&self) -> BatchStatus {
        self.batch().table.status()
    }

    /// Registry view of the most recent batch's principal.
    pub fn reflector(&self) -> Option<Arc<RegistryReflector>> {
        self.reflector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancels one item. A pending item becomes Cancelled at once; an
    /// active item stops at its next suspension point and aborts its
    /// session. Returns `false` for unknown or already finished items.
    pub fn cancel_item(&self, item_id: &str) -> bool {
        let (token, table) = {
            let batch = self.batch();
            (batch.item_tokens.get(item_id).cloned(), Arc::clone(&batch.table))
        };
        let Some(token) = token else {
            return false;
        };
        token.cancel();
        table.cancel_pending(item_id);
        info!(item = %item_id, "item cancellation requested");
        true
    }

    /// Cancels every pending and active item of the running batch.
    /// Registered items are untouched, and later batches start fresh.
    pub fn cancel_all(&self) {
        let (cancel, table) = {
            let batch = self.batch();
            (batch.cancel.clone(), Arc::clone(&batch.table))
        };
        cancel.cancel();
        let pending = table.cancel_all_pending();
        info!(pending, "batch cancellation requested");
    }

    /// Runs `items` to completion with at most `concurrency` in flight.
    ///
    /// The signing context is obtained once, up front; if that fails the
    /// batch does not start. Otherwise every item gets an outcome, in input
    /// order, and one item's failure never stops its siblings.
    pub async fn run(
        &self,
        items: Vec<UploadItem>,
        identity: &dyn IdentitySource,
    ) -> Result<Vec<UploadOutcome>, UploadError> {
        let ctx = identity.signing_context()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let reflector = Arc::new(RegistryReflector::new(self.registry.clone(), ctx));
        *self.reflector.lock().unwrap_or_else(PoisonError::into_inner) = Some(reflector.clone());

        let table = Arc::new(ItemTable::new());
        table.insert(&items);
        let batch_cancel = CancellationToken::new();

        // Build the pending queue and the per-item completion signals.
        let mut queue = VecDeque::with_capacity(items.len());
        let mut waiting = Vec::with_capacity(items.len());
        let mut item_tokens = HashMap::with_capacity(items.len());
        for item in items {
            let cancel = batch_cancel.child_token();
            item_tokens.insert(item.id.clone(), cancel.clone());
            let (done, rx) = oneshot::channel();
            waiting.push((item.clone(), rx));
            queue.push_back(Job { item, cancel, done });
        }
        *self.batch() = BatchState {
            table: Arc::clone(&table),
            cancel: batch_cancel,
            item_tokens,
        };

        let worker = Arc::new(ItemWorker::new(
            self.transfer.clone(),
            reflector,
            self.config.clone(),
            Arc::clone(&table),
            self.events_tx.clone(),
        ));
        let queue = Arc::new(Mutex::new(queue));

        let pool_size = self.config.concurrency.max(1).min(waiting.len());
        info!(items = waiting.len(), workers = pool_size, "batch started");

        let mut pool = JoinSet::new();
        for _ in 0..pool_size {
            let queue = Arc::clone(&queue);
            let worker = Arc::clone(&worker);
            pool.spawn(async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some(job) = next else {
                        break;
                    };
                    let outcome = worker.process(&job.item, &job.cancel).await;
                    let _ = job.done.send(outcome);
                }
            });
        }
        // Workers own the queue now; if they all die, the queued jobs drop
        // with them and their receivers resolve.
        drop(queue);

        let mut outcomes = Vec::with_capacity(waiting.len());
        for (item, rx) in waiting {
            let outcome = match rx.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = UploadError::WorkerLost.to_string();
                    table.fail(&item.id, err.clone());
                    UploadOutcome::failed(&item, err)
                }
            };
            outcomes.push(outcome);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "upload worker panicked");
            }
        }

        {
            let mut batch = self.batch();
            for outcome in &outcomes {
                batch.item_tokens.remove(&outcome.item_id);
            }
        }

        info!(status = %BatchStatus::from_states(outcomes.iter().map(|o| o.state)), "batch finished");
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, TestService};
    use dcdn_protocol::{IdentityError, ItemState, SigningContext, StaticIdentity};
    use tokio::time::Duration;

    struct SignedOut;

    impl IdentitySource for SignedOut {
        fn signing_context(&self) -> Result<SigningContext, IdentityError> {
            Err(IdentityError::NotSignedIn)
        }
    }

    fn alice() -> StaticIdentity {
        StaticIdentity(SigningContext::anonymous("alice"))
    }

    fn orchestrator(h: &Harness, config: UploadConfig) -> UploadOrchestrator {
        UploadOrchestrator::new(h.service.clone(), h.registry.clone(), config)
    }

    fn chunked(concurrency: usize) -> UploadConfig {
        UploadConfig {
            concurrency,
            chunk_size: 4,
            single_shot_threshold: 0,
            ..UploadConfig::default()
        }
    }

    fn items(n: usize) -> Vec<UploadItem> {
        (0..n)
            .map(|i| UploadItem::from_bytes(format!("/assets/f{i}.bin"), format!("payload-{i:04}").into_bytes()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let h = Harness::new(TestService::with_delay(Duration::from_millis(10)));
        let orch = orchestrator(&h, chunked(3));

        let outcomes = orch.run(items(10), &alice()).await.unwrap();

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| o.state == ItemState::Registered));
        assert_eq!(h.service.max_in_flight(), 3);
        let status = orch.status();
        assert!(status.is_done());
        assert_eq!(status.to_string(), "10 of 10 complete");
    }

    #[tokio::test]
    async fn outcomes_follow_input_order() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, chunked(4));
        let batch = items(6);
        let ids: Vec<String> = batch.iter().map(|i| i.id.clone()).collect();

        let outcomes = orch.run(batch, &alice()).await.unwrap();
        let got: Vec<String> = outcomes.into_iter().map(|o| o.item_id).collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn registered_entries_are_visible_after_run() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, UploadConfig::default());
        let outcomes = orch.run(items(3), &alice()).await.unwrap();

        let view = orch.reflector().unwrap().view();
        assert_eq!(view.len(), 3);
        for outcome in &outcomes {
            let record = outcome.record.as_ref().unwrap();
            assert!(view.iter().any(|e| e.content_ref == record.content_ref && e.size == record.size));
        }
    }

    #[tokio::test]
    async fn failing_item_does_not_stop_siblings() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, UploadConfig::default());
        let mut batch = items(3);
        batch.insert(1, UploadItem::from_bytes("relative/path.txt", b"x".to_vec()));

        let outcomes = orch.run(batch, &alice()).await.unwrap();
        let states: Vec<ItemState> = outcomes.iter().map(|o| o.state).collect();
        assert_eq!(
            states,
            vec![
                ItemState::Registered,
                ItemState::Failed,
                ItemState::Registered,
                ItemState::Registered,
            ]
        );
        assert!(outcomes[1].error.as_deref().unwrap().contains("invalid path"));
    }

    #[tokio::test]
    async fn identity_failure_prevents_batch() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, UploadConfig::default());
        let result = orch.run(items(2), &SignedOut).await;
        assert!(matches!(result, Err(UploadError::Identity(IdentityError::NotSignedIn))));
        assert!(h.service.calls().is_empty());
        assert!(orch.items().is_empty());
    }

    #[tokio::test]
    async fn empty_batch() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, UploadConfig::default());
        assert!(orch.run(Vec::new(), &alice()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_active_item_aborts_once() {
        let h = Harness::new(TestService::with_delay(Duration::from_millis(10)));
        let mut orch = orchestrator(&h, chunked(1));
        let mut events = orch.take_events().unwrap();
        let orch = Arc::new(orch);

        let batch = vec![UploadItem::from_bytes("/assets/big.bin", vec![7u8; 64])];
        let target = batch[0].id.clone();
        let runner = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run(batch, &alice()).await })
        };

        // Wait for the first acknowledged chunk, then cancel.
        while let Some(event) = events.recv().await {
            if matches!(event, UploadEvent::Progress { .. }) {
                break;
            }
        }
        assert!(orch.cancel_item(&target));

        let outcomes = runner.await.unwrap().unwrap();
        assert_eq!(outcomes[0].state, ItemState::Cancelled);
        assert_eq!(h.service.count("abort"), 1);
        assert_eq!(h.service.count("commit"), 0);
        assert!(orch.reflector().unwrap().view().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_spares_registered_items() {
        let h = Harness::new(TestService::with_delay(Duration::from_millis(10)));
        let mut orch = orchestrator(&h, chunked(1));
        let mut events = orch.take_events().unwrap();
        let orch = Arc::new(orch);

        let batch = items(4);
        let runner = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run(batch, &alice()).await })
        };

        // Let the first item register, then cancel while the second runs.
        let mut registered = 0;
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::Registered { .. } => registered += 1,
                UploadEvent::Progress { .. } if registered == 1 => break,
                _ => {}
            }
        }
        orch.cancel_all();

        let outcomes = runner.await.unwrap().unwrap();
        let states: Vec<ItemState> = outcomes.iter().map(|o| o.state).collect();
        assert_eq!(
            states,
            vec![
                ItemState::Registered,
                ItemState::Cancelled,
                ItemState::Cancelled,
                ItemState::Cancelled,
            ]
        );
        // Only the active item had a session to abort.
        assert_eq!(h.service.count("abort"), 1);
        assert_eq!(h.service.count("start"), 2);
        assert_eq!(orch.reflector().unwrap().view().len(), 1);
    }

    #[tokio::test]
    async fn cancel_all_does_not_carry_into_next_batch() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, UploadConfig::default());

        // Cancelling with nothing running affects no later batch.
        orch.cancel_all();
        let first = orch
            .run(vec![UploadItem::from_bytes("/assets/one.txt", b"1".to_vec())], &alice())
            .await
            .unwrap();
        assert_eq!(first[0].state, ItemState::Registered);

        orch.cancel_all();
        let second = orch
            .run(vec![UploadItem::from_bytes("/assets/two.txt", b"2".to_vec())], &alice())
            .await
            .unwrap();
        assert_eq!(second[0].state, ItemState::Registered);
        assert_eq!(h.service.count("put"), 2);
    }

    #[tokio::test]
    async fn status_describes_latest_batch_only() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, UploadConfig::default());

        let earlier = items(2);
        let earlier_id = earlier[0].id.clone();
        orch.run(earlier, &alice()).await.unwrap();
        assert_eq!(orch.status().to_string(), "2 of 2 complete");

        let next = vec![UploadItem::from_bytes("/assets/next.txt", b"n".to_vec())];
        let next_id = next[0].id.clone();
        orch.run(next, &alice()).await.unwrap();

        let status = orch.status();
        assert_eq!(status.total, 1);
        assert_eq!(status.to_string(), "1 of 1 complete");
        let listed: Vec<String> = orch.items().into_iter().map(|p| p.item_id).collect();
        assert_eq!(listed, vec![next_id]);
        // Items of the finished batch can no longer be cancelled.
        assert!(!orch.cancel_item(&earlier_id));
    }

    #[tokio::test]
    async fn lost_workers_fail_every_unfinished_item() {
        let h = Harness::new(TestService::panicking_put());
        let orch = orchestrator(&h, UploadConfig {
            concurrency: 1,
            ..UploadConfig::default()
        });

        let outcomes = orch.run(items(3), &alice()).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        for outcome in &outcomes {
            assert_eq!(outcome.state, ItemState::Failed);
            assert_eq!(
                outcome.error.as_deref(),
                Some(UploadError::WorkerLost.to_string().as_str())
            );
        }
        // Only the first item ever reached the service.
        assert_eq!(h.service.count("put"), 1);
        assert_eq!(orch.status().failed, 3);
    }

    #[tokio::test]
    async fn cancel_unknown_item() {
        let h = Harness::new(TestService::default());
        let orch = orchestrator(&h, UploadConfig::default());
        assert!(!orch.cancel_item("nope"));
    }

    #[tokio::test]
    async fn take_events_once() {
        let h = Harness::new(TestService::default());
        let mut orch = orchestrator(&h, UploadConfig::default());
        assert!(orch.take_events().is_some());
        assert!(orch.take_events().is_none());
    }
}
