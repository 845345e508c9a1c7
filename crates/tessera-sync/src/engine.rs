//! The write-locked ingestion engine.
//!
//! Every store mutation goes through one writer guarded by a scheduler-level
//! [`tokio::sync::Mutex`]. Producers never take the lock: the hub thread,
//! the chunk tracker and direct callers push [`WorkItem`]s into the bounded
//! [`IngestQueue`], and a single drain task applies them in dequeue order.
//! Readers that need a settled view call [`SyncEngine::ensure_synced`], which
//! takes the same lock, drains what is queued and loads the chunks they
//! depend on.
//!
//! ```text
//!  hub thread ──► handle_envelope ──┬─► correlator (action completions)
//!                                   ├─► tracker ──► LoadChunk ─┐
//!                                   └─► Apply(op) ─────────────┤
//!                                                              ▼
//!                                            IngestQueue (try_send, drop newest)
//!                                                              │
//!                          drain task / ensure_synced ──► Writer (lock) ──► store
//! ```

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tessera_hub::{Correlator, CorrelatorError, EventHub, SubscriptionId, WILDCARD};
use tessera_store::WorldStore;
use tessera_types::{ChunkCoord, ChunkState, Envelope, Operation};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{EngineConfig, SyncConfig};
use crate::error::{LoaderError, SyncError};
use crate::loader::{LoadReport, SnapshotLoader};
use crate::queue::{IngestQueue, WorkItem};
use crate::sequence::{GapRange, SequenceTracker, SequenceVerdict};
use crate::stats::{GapRecord, SyncCounters, SyncStats};
use crate::tracker::ChunkTracker;

/// Longest budget `ensure_synced` honours.
const MAX_SYNC_TIMEOUT: Duration = Duration::from_secs(86_400);

/// Outcome of [`SyncEngine::ensure_synced`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Work items drained from the queue.
    pub drained: u64,
    /// Required chunks loaded during the call.
    pub loaded: u64,
    /// Required chunks whose load failed.
    pub failed: u64,
    /// Required chunks still not loaded on return.
    pub unresolved: usize,
    /// Whether the budget ran out.
    pub timed_out: bool,
}

/// Outcome of [`SyncEngine::sweep_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Chunks loaded.
    pub loaded: u64,
    /// Chunks whose load failed.
    pub failed: u64,
}

/// State only the lock holder may touch.
struct Writer {
    receiver: mpsc::Receiver<WorkItem>,
    sequences: SequenceTracker,
}

struct Inner {
    writer: Mutex<Writer>,
    queue: IngestQueue,
    tracker: Arc<ChunkTracker>,
    correlator: Arc<Correlator>,
    store: WorldStore,
    loader: SnapshotLoader,
    counters: Arc<SyncCounters>,
    config: EngineConfig,
}

/// Handle to a running ingestion engine.
pub struct SyncEngine {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    drain_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("queued", &self.inner.queue.len())
            .field("chunks", &self.inner.tracker.known_chunks().len())
            .field("pending_actions", &self.inner.correlator.pending_count())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Start an engine over `store`, loading snapshots from the configured
    /// root. Must be called inside a Tokio runtime.
    pub fn start(config: &SyncConfig, store: WorldStore) -> Self {
        Self::start_with_loader(
            config.engine.clone(),
            SnapshotLoader::from_config(&config.snapshots),
            store,
        )
    }

    /// Start an engine with an explicit loader.
    pub fn start_with_loader(
        config: EngineConfig,
        loader: SnapshotLoader,
        store: WorldStore,
    ) -> Self {
        let counters = Arc::new(SyncCounters::default());
        let (queue, receiver) = IngestQueue::channel(config.queue_capacity, Arc::clone(&counters));
        let tracker = Arc::new(ChunkTracker::with_load_queue(queue.clone()));

        let inner = Arc::new(Inner {
            writer: Mutex::new(Writer {
                receiver,
                sequences: SequenceTracker::new(config.sequence_scope),
            }),
            queue,
            tracker,
            correlator: Arc::new(Correlator::new()),
            store,
            loader,
            counters,
            config,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let drain_task = tokio::spawn(drain_loop(Arc::clone(&inner), shutdown_rx));

        tracing::info!(
            queue_capacity = inner.config.queue_capacity,
            sequence_scope = ?inner.config.sequence_scope,
            snapshot_root = %inner.loader.root().display(),
            "Sync engine started"
        );

        Self {
            inner,
            shutdown_tx,
            drain_task: std::sync::Mutex::new(Some(drain_task)),
        }
    }

    // -----------------------------------------------------------------------
    // Producers
    // -----------------------------------------------------------------------

    /// Subscribe the engine to every envelope on `hub`.
    pub fn attach(&self, hub: &EventHub) -> SubscriptionId {
        let inner = Arc::clone(&self.inner);
        hub.subscribe(WILDCARD, move |envelope| inner.handle_envelope(envelope))
    }

    /// Route one envelope: action completions to the correlator, chunk
    /// progress to the tracker, mutations to the queue.
    pub fn handle_envelope(&self, envelope: &Envelope) {
        self.inner.handle_envelope(envelope);
    }

    /// Queue `op` for application. Returns `false` if it was dropped.
    pub fn submit(&self, op: Operation) -> bool {
        self.inner.queue.push(WorkItem::Apply(op))
    }

    // -----------------------------------------------------------------------
    // Consistency
    // -----------------------------------------------------------------------

    /// Bring the store up to date for `required` chunks within `timeout`.
    ///
    /// Drains everything queued, then for each required chunk that is not
    /// loaded (or is stale) waits, without holding the lock, for it to reach
    /// `Complete` and loads it. Running out of time is not an error: the
    /// report says so and the store is left eventually consistent.
    ///
    /// Not reentrant; one logical caller per engine.
    pub async fn ensure_synced(
        &self,
        timeout: Duration,
        required: &[ChunkCoord],
    ) -> Result<SyncReport, SyncError> {
        let inner = &self.inner;
        let start = Instant::now();
        let deadline = start
            .checked_add(timeout.min(MAX_SYNC_TIMEOUT))
            .unwrap_or(start);
        let mut report = SyncReport::default();

        'sync: {
            let Ok(mut writer) = tokio::time::timeout_at(deadline, inner.writer.lock()).await
            else {
                report.timed_out = true;
                break 'sync;
            };
            let (drained, complete) = inner.drain(&mut writer, Some(deadline)).await;
            report.drained = report.drained.saturating_add(drained);
            if !complete {
                report.timed_out = true;
                break 'sync;
            }
            drop(writer);

            for &chunk in required {
                if inner.tracker.is_loaded(chunk) {
                    continue;
                }
                if !inner.tracker.is_complete(chunk) {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if inner.tracker.wait_for_chunk(chunk, remaining).await.is_err() {
                        report.timed_out = true;
                        break 'sync;
                    }
                }

                let Ok(mut writer) =
                    tokio::time::timeout_at(deadline, inner.writer.lock()).await
                else {
                    report.timed_out = true;
                    break 'sync;
                };
                // Queued live events for the chunk go in before the reload.
                let (drained, _) = inner.drain(&mut writer, Some(deadline)).await;
                report.drained = report.drained.saturating_add(drained);
                if inner.tracker.is_loaded(chunk) {
                    continue;
                }
                match inner.load(&writer, chunk).await {
                    Ok(_) => report.loaded = report.loaded.saturating_add(1),
                    Err(_) => report.failed = report.failed.saturating_add(1),
                }
            }
        }

        report.unresolved = required
            .iter()
            .filter(|c| !inner.tracker.is_loaded(**c))
            .count();

        if report.timed_out {
            tracing::warn!(
                ?timeout,
                drained = report.drained,
                loaded = report.loaded,
                unresolved = report.unresolved,
                "ensure_synced budget expired; store is eventually consistent"
            );
        } else {
            tracing::debug!(
                elapsed = ?start.elapsed(),
                drained = report.drained,
                loaded = report.loaded,
                "Store synced"
            );
        }
        Ok(report)
    }

    /// [`ensure_synced`](Self::ensure_synced) with the configured default
    /// budget.
    pub async fn ensure_synced_default(
        &self,
        required: &[ChunkCoord],
    ) -> Result<SyncReport, SyncError> {
        self.ensure_synced(self.inner.config.default_sync_timeout(), required)
            .await
    }

    /// Like [`ensure_synced`](Self::ensure_synced), but an expired budget is
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SyncTimeout`] when the budget runs out.
    pub async fn ensure_synced_strict(
        &self,
        timeout: Duration,
        required: &[ChunkCoord],
    ) -> Result<SyncReport, SyncError> {
        let report = self.ensure_synced(timeout, required).await?;
        if report.timed_out {
            return Err(SyncError::SyncTimeout {
                timeout,
                unresolved: report.unresolved,
            });
        }
        Ok(report)
    }

    /// Purge `chunk` and rebuild it from its snapshot files, whatever its
    /// tracked state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Loader`] when the files cannot be read or the
    /// purge fails.
    pub async fn reload_chunk(&self, chunk: ChunkCoord) -> Result<LoadReport, SyncError> {
        let writer = self.inner.writer.lock().await;
        Ok(self.inner.load(&writer, chunk).await?)
    }

    /// Load every complete chunk that is unloaded or stale.
    pub async fn sweep_pending(&self) -> SweepReport {
        let writer = self.inner.writer.lock().await;
        let mut report = SweepReport::default();
        for chunk in self.inner.tracker.pending_chunks() {
            match self.inner.load(&writer, chunk).await {
                Ok(_) => report.loaded = report.loaded.saturating_add(1),
                Err(_) => report.failed = report.failed.saturating_add(1),
            }
        }
        if report.loaded > 0 || report.failed > 0 {
            tracing::info!(loaded = report.loaded, failed = report.failed, "Pending chunk sweep");
        }
        report
    }

    /// Reset `chunk` to `Idle` so it is reloaded after its next completion.
    pub fn invalidate_chunk(&self, chunk: ChunkCoord) {
        self.inner.tracker.invalidate(chunk);
    }

    // -----------------------------------------------------------------------
    // Waiting
    // -----------------------------------------------------------------------

    /// Wait until `chunk` reaches `Complete`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChunkTimeout`] if it does not within `timeout`.
    pub async fn wait_for_chunk(
        &self,
        chunk: ChunkCoord,
        timeout: Duration,
    ) -> Result<(), SyncError> {
        self.inner.tracker.wait_for_chunk(chunk, timeout).await
    }

    /// Register `action_id` before issuing the command it identifies.
    pub fn register_action(&self, action_id: &str) {
        self.inner.correlator.register(action_id);
    }

    /// Wait for the completion of a registered action.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ActionTimeout`] on timeout and
    /// [`SyncError::Correlator`] if the id was never registered or was
    /// re-registered while waiting.
    pub async fn wait_for_action(
        &self,
        action_id: &str,
        timeout: Duration,
    ) -> Result<Envelope, SyncError> {
        self.inner
            .correlator
            .wait(action_id, timeout)
            .await
            .map_err(|e| match e {
                CorrelatorError::Timeout { action_id, timeout } => {
                    SyncError::ActionTimeout { action_id, timeout }
                }
                other => other.into(),
            })
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Latest snapshot state of `chunk`.
    pub fn get_chunk_state(&self, chunk: ChunkCoord) -> ChunkState {
        self.inner.tracker.get_state(chunk)
    }

    /// Whether `chunk` is loaded and not stale.
    pub fn is_chunk_loaded(&self, chunk: ChunkCoord) -> bool {
        self.inner.tracker.is_loaded(chunk)
    }

    /// Whether `chunk` may be missing live events.
    pub fn is_chunk_stale(&self, chunk: ChunkCoord) -> bool {
        self.inner.tracker.is_stale(chunk)
    }

    /// Read access to the store. Reads are eventually consistent unless
    /// preceded by [`ensure_synced`](Self::ensure_synced).
    pub fn store(&self) -> &WorldStore {
        &self.inner.store
    }

    /// The chunk tracker.
    pub fn tracker(&self) -> &Arc<ChunkTracker> {
        &self.inner.tracker
    }

    /// The action correlator.
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.correlator
    }

    /// Items currently queued.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Ingestion counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.counters.snapshot()
    }

    /// Stop the drain task, then apply whatever is still queued.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self
            .drain_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let joined = match handle {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        if let Err(e) = joined {
            tracing::error!(error = %e, "Drain task ended abnormally");
        }
        let mut writer = self.inner.writer.lock().await;
        let (drained, _) = self.inner.drain(&mut writer, None).await;
        tracing::info!(drained, "Sync engine stopped");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Writer side
// ---------------------------------------------------------------------------

async fn drain_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            () = inner.queue.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        let mut writer = inner.writer.lock().await;
        inner.drain(&mut writer, None).await;
    }
    tracing::debug!("Drain task exiting");
}

impl Inner {
    fn handle_envelope(&self, envelope: &Envelope) {
        if envelope.is_action_completion() {
            self.correlator.on_event(envelope);
        }
        self.tracker.on_event(envelope);
        match envelope.to_operation() {
            Ok(Some(op)) => {
                self.queue.push(WorkItem::Apply(op));
            }
            Ok(None) => {}
            Err(e) => {
                SyncCounters::bump(&self.counters.rejected);
                tracing::warn!(
                    event_type = %envelope.event_type,
                    sequence = ?envelope.sequence,
                    error = %e,
                    "Rejected envelope"
                );
            }
        }
    }

    /// Pop and process items until the queue is empty or `deadline`
    /// passes. Returns the number processed and whether the queue was
    /// emptied.
    async fn drain(&self, writer: &mut Writer, deadline: Option<Instant>) -> (u64, bool) {
        let mut processed: u64 = 0;
        loop {
            if writer.receiver.is_empty() {
                return (processed, true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return (processed, false);
            }
            let Ok(item) = writer.receiver.try_recv() else {
                return (processed, true);
            };
            self.process(writer, item).await;
            processed = processed.saturating_add(1);
        }
    }

    async fn process(&self, writer: &mut Writer, item: WorkItem) {
        match item {
            WorkItem::Apply(op) => self.apply(writer, op).await,
            WorkItem::LoadChunk(chunk) => {
                if self.tracker.is_loaded(chunk) {
                    tracing::debug!(%chunk, "Chunk already loaded; skipping load request");
                } else if !self.tracker.is_complete(chunk) {
                    tracing::debug!(%chunk, "Chunk no longer complete; skipping load request");
                } else {
                    // Failures are counted and left for the sweep.
                    let _ = self.load(writer, chunk).await;
                }
            }
        }
    }

    async fn apply(&self, writer: &mut Writer, mut op: Operation) {
        let chunk = op.resolve_chunk(self.config.chunk_size);

        if let Some(seq) = op.sequence {
            match writer.sequences.observe(&op.topic, seq) {
                SequenceVerdict::Duplicate => {
                    SyncCounters::bump(&self.counters.duplicates);
                    tracing::debug!(key = %op.key, seq, "Skipping duplicate operation");
                    return;
                }
                SequenceVerdict::Gap(range) => self.on_gap(&op.topic, range, chunk),
                SequenceVerdict::LateFill => {
                    SyncCounters::bump(&self.counters.late_fills);
                    tracing::debug!(key = %op.key, seq, "Skipping late operation from a recorded gap");
                    return;
                }
                SequenceVerdict::First | SequenceVerdict::InOrder => {}
            }
        }

        match self.store.apply(&op).await {
            Ok(outcome) => {
                SyncCounters::bump(&self.counters.applied);
                tracing::trace!(key = %op.key, kind = ?op.kind, ?outcome, "Applied operation");
            }
            Err(e) => {
                SyncCounters::bump(&self.counters.failed);
                tracing::warn!(key = %op.key, kind = ?op.kind, error = %e, "Skipping operation the store rejected");
            }
        }
    }

    fn on_gap(&self, topic: &str, range: GapRange, chunk: Option<ChunkCoord>) {
        match chunk {
            Some(chunk) => {
                self.tracker.mark_stale(chunk);
                tracing::warn!(
                    topic,
                    missing_from = range.start,
                    missing_to = range.end,
                    %chunk,
                    "Sequence gap; chunk marked stale"
                );
            }
            None => {
                let marked = self.tracker.mark_all_stale();
                tracing::warn!(
                    topic,
                    missing_from = range.start,
                    missing_to = range.end,
                    marked,
                    "Sequence gap on chunkless event; every known chunk marked stale"
                );
            }
        }
        self.counters.record_gap(GapRecord {
            topic: topic.to_owned(),
            range,
            chunk,
            detected_at: chrono::Utc::now(),
        });
    }

    /// Reload `chunk`. Taking the writer proves the caller holds the lock.
    async fn load(&self, _writer: &Writer, chunk: ChunkCoord) -> Result<LoadReport, LoaderError> {
        match self.loader.load_chunk(&self.store, chunk).await {
            Ok(report) => {
                self.tracker.mark_loaded(chunk);
                SyncCounters::bump(&self.counters.chunk_loads);
                Ok(report)
            }
            Err(e) => {
                self.tracker.mark_load_failed(chunk);
                SyncCounters::bump(&self.counters.load_failures);
                tracing::warn!(%chunk, error = %e, "Chunk load failed; will retry");
                Err(e)
            }
        }
    }
}
