//! Chunk snapshot state tracking.
//!
//! The external world reports snapshot progress per chunk. The tracker keeps
//! the latest state of every chunk it has heard of, moves it strictly
//! forward, and asks the ingestion engine for a one-shot load the first time
//! a chunk reaches [`ChunkState::Complete`].
//!
//! The map sits behind a `std` mutex because [`ChunkTracker::on_event`] runs
//! on the hub thread. Waiters are woken through a `watch` channel whose
//! value is a version counter bumped on every change.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_types::{ChunkCoord, ChunkState, Envelope};
use tokio::sync::watch;

use crate::error::SyncError;
use crate::queue::{IngestQueue, WorkItem};

/// Tracked attributes of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    /// Latest reported snapshot state.
    pub state: ChunkState,
    /// Whether the chunk's snapshot has been loaded into the store.
    pub loaded: bool,
    /// Whether live events may have been lost since the last load.
    pub stale: bool,
    /// Whether a load is queued and not yet finished.
    pub load_requested: bool,
    /// Failed loads since the last successful one.
    pub load_failures: u32,
    /// When `state` last changed.
    pub last_transition_at: DateTime<Utc>,
}

impl ChunkRecord {
    fn new() -> Self {
        Self {
            state: ChunkState::Idle,
            loaded: false,
            stale: false,
            load_requested: false,
            load_failures: 0,
            last_transition_at: Utc::now(),
        }
    }

    /// Loaded and not stale.
    pub const fn is_fresh(&self) -> bool {
        self.loaded && !self.stale
    }

    /// Complete but in need of a (re)load.
    pub const fn needs_load(&self) -> bool {
        self.state.is_complete() && !self.is_fresh()
    }
}

/// Forward-only chunk state machine with an eager load trigger.
#[derive(Debug)]
pub struct ChunkTracker {
    chunks: Mutex<BTreeMap<ChunkCoord, ChunkRecord>>,
    version: watch::Sender<u64>,
    load_queue: Option<IngestQueue>,
}

impl Default for ChunkTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkTracker {
    /// A tracker that never requests loads on its own.
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            chunks: Mutex::new(BTreeMap::new()),
            version,
            load_queue: None,
        }
    }

    /// A tracker that pushes [`WorkItem::LoadChunk`] into `queue` when a
    /// chunk completes.
    pub fn with_load_queue(queue: IngestQueue) -> Self {
        Self {
            load_queue: Some(queue),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ChunkCoord, ChunkRecord>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Hub handler: apply the chunk transition carried by `envelope`, if any.
    pub fn on_event(&self, envelope: &Envelope) {
        let Some((chunk, raw)) = envelope.chunk_transition() else {
            return;
        };
        match raw.parse::<ChunkState>() {
            Ok(state) => {
                self.advance(chunk, state);
            }
            Err(e) => {
                tracing::warn!(%chunk, state = raw, error = %e, "Ignoring unknown chunk state");
            }
        }
    }

    /// Move `chunk` to `state` if that is forward. Returns whether it moved.
    ///
    /// A `Complete` report for a chunk that still needs loading queues a
    /// load even when the state did not move, so a repeated completion
    /// signal retries a failed load.
    pub fn advance(&self, chunk: ChunkCoord, state: ChunkState) -> bool {
        let (moved, request_load) = {
            let mut chunks = self.lock();
            let record = chunks.entry(chunk).or_insert_with(ChunkRecord::new);
            let moved = state > record.state;
            if moved {
                record.state = state;
                record.last_transition_at = Utc::now();
                tracing::debug!(%chunk, %state, "Chunk advanced");
            } else if state < record.state {
                tracing::debug!(
                    %chunk,
                    current = %record.state,
                    reported = %state,
                    "Ignoring chunk state regression"
                );
            }

            let request = state.is_complete()
                && record.needs_load()
                && !record.load_requested
                && self.load_queue.is_some();
            if request {
                record.load_requested = true;
            }
            (moved, request)
        };
        if moved {
            self.bump();
        }
        if request_load {
            self.request_load(chunk);
        }
        moved
    }

    fn request_load(&self, chunk: ChunkCoord) {
        let queued = self
            .load_queue
            .as_ref()
            .is_some_and(|queue| queue.push(WorkItem::LoadChunk(chunk)));
        if queued {
            return;
        }
        // Left for the sweep.
        if let Some(record) = self.lock().get_mut(&chunk) {
            record.load_requested = false;
        }
    }

    /// Mark `chunk` as possibly missing live events. Its state is kept, so a
    /// complete chunk becomes eligible for reload immediately.
    pub fn mark_stale(&self, chunk: ChunkCoord) {
        {
            let mut chunks = self.lock();
            let record = chunks.entry(chunk).or_insert_with(ChunkRecord::new);
            record.stale = true;
            record.loaded = false;
        }
        self.bump();
    }

    /// Mark every known chunk stale. Returns how many were marked.
    pub fn mark_all_stale(&self) -> usize {
        let count = {
            let mut chunks = self.lock();
            for record in chunks.values_mut() {
                record.stale = true;
                record.loaded = false;
            }
            chunks.len()
        };
        self.bump();
        count
    }

    /// Reset `chunk` to `Idle`, clearing `loaded` and setting `stale`.
    pub fn invalidate(&self, chunk: ChunkCoord) {
        {
            let mut chunks = self.lock();
            let record = chunks.entry(chunk).or_insert_with(ChunkRecord::new);
            record.state = ChunkState::Idle;
            record.loaded = false;
            record.stale = true;
            record.load_requested = false;
            record.last_transition_at = Utc::now();
        }
        tracing::info!(%chunk, "Chunk invalidated");
        self.bump();
    }

    /// Record a successful load.
    pub fn mark_loaded(&self, chunk: ChunkCoord) {
        {
            let mut chunks = self.lock();
            let record = chunks.entry(chunk).or_insert_with(ChunkRecord::new);
            record.loaded = true;
            record.stale = false;
            record.load_requested = false;
            record.load_failures = 0;
        }
        self.bump();
    }

    /// Record a failed load. The chunk stays pending for the next sweep.
    pub fn mark_load_failed(&self, chunk: ChunkCoord) {
        {
            let mut chunks = self.lock();
            let record = chunks.entry(chunk).or_insert_with(ChunkRecord::new);
            record.load_requested = false;
            record.load_failures = record.load_failures.saturating_add(1);
        }
        self.bump();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Latest state of `chunk`; unknown chunks are `Idle`.
    pub fn get_state(&self, chunk: ChunkCoord) -> ChunkState {
        self.lock().get(&chunk).map_or(ChunkState::Idle, |r| r.state)
    }

    /// Whether `chunk` is loaded and not stale.
    pub fn is_loaded(&self, chunk: ChunkCoord) -> bool {
        self.lock().get(&chunk).is_some_and(ChunkRecord::is_fresh)
    }

    /// Whether `chunk` has reached `Complete`.
    pub fn is_complete(&self, chunk: ChunkCoord) -> bool {
        self.get_state(chunk).is_complete()
    }

    /// Whether `chunk` is marked stale.
    pub fn is_stale(&self, chunk: ChunkCoord) -> bool {
        self.lock().get(&chunk).is_some_and(|r| r.stale)
    }

    /// Every complete chunk that still needs a (re)load.
    pub fn pending_chunks(&self) -> Vec<ChunkCoord> {
        self.lock()
            .iter()
            .filter(|(_, r)| r.needs_load())
            .map(|(c, _)| *c)
            .collect()
    }

    /// Every chunk marked stale.
    pub fn stale_chunks(&self) -> Vec<ChunkCoord> {
        self.lock()
            .iter()
            .filter(|(_, r)| r.stale)
            .map(|(c, _)| *c)
            .collect()
    }

    /// Every chunk heard of.
    pub fn known_chunks(&self) -> Vec<ChunkCoord> {
        self.lock().keys().copied().collect()
    }

    /// Copy of every record, ordered by coordinate.
    pub fn snapshot(&self) -> Vec<(ChunkCoord, ChunkRecord)> {
        self.lock().iter().map(|(c, r)| (*c, *r)).collect()
    }

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
        // Subscribe before the first check so no transition is missed.
        let mut rx = self.version.subscribe();
        let wait = async {
            loop {
                if self.is_complete(chunk) {
                    return;
                }
                if rx.changed().await.is_err() {
                    // The sender lives in `self`, so this only happens during
                    // teardown; fall back to the timeout.
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            tracing::debug!(%chunk, ?timeout, "Timed out waiting for chunk");
            SyncError::ChunkTimeout { chunk, timeout }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stats::SyncCounters;

    fn chunk_event(x: i32, y: i32, state: &str) -> Envelope {
        let mut env = Envelope::new("chunk_state");
        env.chunk = Some(ChunkCoord::new(x, y));
        env.state = Some(state.to_owned());
        env
    }

    #[test]
    fn states_only_move_forward() {
        let tracker = ChunkTracker::new();
        let c = ChunkCoord::new(0, 0);
        assert_eq!(tracker.get_state(c), ChunkState::Idle);

        tracker.on_event(&chunk_event(0, 0, "serialize"));
        tracker.on_event(&chunk_event(0, 0, "discover"));
        assert_eq!(tracker.get_state(c), ChunkState::Serialize);

        tracker.on_event(&chunk_event(0, 0, "bogus"));
        assert_eq!(tracker.get_state(c), ChunkState::Serialize);

        assert!(tracker.advance(c, ChunkState::Complete));
        assert!(!tracker.advance(c, ChunkState::Complete));
        assert_eq!(tracker.pending_chunks(), vec![c]);
    }

    #[test]
    fn invalidate_resets_and_marks_stale() {
        let tracker = ChunkTracker::new();
        let c = ChunkCoord::new(2, -1);
        tracker.advance(c, ChunkState::Complete);
        tracker.mark_loaded(c);
        assert!(tracker.is_loaded(c));
        assert!(tracker.pending_chunks().is_empty());

        tracker.invalidate(c);
        assert_eq!(tracker.get_state(c), ChunkState::Idle);
        assert!(!tracker.is_loaded(c));
        assert!(tracker.is_stale(c));
        assert!(tracker.pending_chunks().is_empty());

        tracker.advance(c, ChunkState::Discover);
        assert_eq!(tracker.get_state(c), ChunkState::Discover);
    }

    #[test]
    fn stale_complete_chunk_is_pending_again() {
        let tracker = ChunkTracker::new();
        let a = ChunkCoord::new(0, 0);
        let b = ChunkCoord::new(1, 0);
        for c in [a, b] {
            tracker.advance(c, ChunkState::Complete);
            tracker.mark_loaded(c);
        }
        tracker.mark_stale(a);
        assert_eq!(tracker.get_state(a), ChunkState::Complete);
        assert_eq!(tracker.pending_chunks(), vec![a]);
        assert_eq!(tracker.stale_chunks(), vec![a]);

        assert_eq!(tracker.mark_all_stale(), 2);
        assert_eq!(tracker.pending_chunks(), vec![a, b]);
    }

    #[tokio::test]
    async fn completion_requests_one_load() {
        let counters = Arc::new(SyncCounters::default());
        let (queue, mut rx) = IngestQueue::channel(8, counters);
        let tracker = ChunkTracker::with_load_queue(queue);
        let c = ChunkCoord::new(3, 3);

        tracker.on_event(&chunk_event(3, 3, "persist"));
        assert!(rx.try_recv().is_err());

        tracker.on_event(&chunk_event(3, 3, "complete"));
        assert_eq!(rx.try_recv().unwrap(), WorkItem::LoadChunk(c));

        // Re-reported completion does not queue a second load.
        tracker.on_event(&chunk_event(3, 3, "complete"));
        assert!(rx.try_recv().is_err());

        // A failed load clears the request; the next completion signal retries.
        tracker.mark_load_failed(c);
        assert!(!tracker.advance(c, ChunkState::Complete));
        assert_eq!(rx.try_recv().unwrap(), WorkItem::LoadChunk(c));
        assert_eq!(tracker.snapshot().first().unwrap().1.load_failures, 1);

        // Once loaded, completion signals are ignored.
        tracker.mark_loaded(c);
        tracker.advance(c, ChunkState::Complete);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_for_chunk_wakes_on_completion() {
        let tracker = Arc::new(ChunkTracker::new());
        let c = ChunkCoord::new(-1, 5);
        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_for_chunk(c, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        tracker.advance(c, ChunkState::Persist);
        tracker.advance(c, ChunkState::Complete);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wait_for_chunk_times_out() {
        let tracker = ChunkTracker::new();
        let c = ChunkCoord::new(9, 9);
        tracker.advance(c, ChunkState::Persist);
        let err = tracker
            .wait_for_chunk(c, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ChunkTimeout { chunk, .. } if chunk == c));
    }
}
