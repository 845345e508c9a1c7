//! The bounded ingestion queue.
//!
//! Producers run on the hub thread and must never block, so pushes use
//! `try_send` and a full queue drops the newest item. Every accepted push
//! wakes the drain task through a [`Notify`].

use std::sync::Arc;

use tessera_types::{ChunkCoord, Operation};
use tokio::sync::{Notify, mpsc};

use crate::stats::SyncCounters;

/// A unit of work for the engine writer.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// Apply one operation.
    Apply(Operation),
    /// Load a chunk from its snapshot files, unless already loaded.
    LoadChunk(ChunkCoord),
}

impl WorkItem {
    /// Short label for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::LoadChunk(_) => "load_chunk",
        }
    }
}

/// Producer handle of the ingestion queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<WorkItem>,
    notify: Arc<Notify>,
    counters: Arc<SyncCounters>,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` items, returning the
    /// producer handle and the receiver for the writer.
    pub fn channel(
        capacity: usize,
        counters: Arc<SyncCounters>,
    ) -> (Self, mpsc::Receiver<WorkItem>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender,
            notify: Arc::new(Notify::new()),
            counters,
        };
        (queue, receiver)
    }

    /// Enqueue `item` without blocking. Returns `false` if it was dropped.
    pub fn push(&self, item: WorkItem) -> bool {
        match self.sender.try_send(item) {
            Ok(()) => {
                self.notify.notify_one();
                true
            }
            Err(mpsc::error::TrySendError::Full(item)) => {
                SyncCounters::bump(&self.counters.dropped);
                tracing::warn!(
                    kind = item.kind(),
                    capacity = self.sender.max_capacity(),
                    "Ingestion queue saturated; dropping newest item"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                tracing::debug!(kind = item.kind(), "Ingestion queue closed; item discarded");
                false
            }
        }
    }

    /// Wait until a push has happened since the last wake-up.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake the drain task without pushing.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.sender
            .max_capacity()
            .saturating_sub(self.sender.capacity())
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_drops_newest_and_counts() {
        let counters = Arc::new(SyncCounters::default());
        let (queue, mut rx) = IngestQueue::channel(2, Arc::clone(&counters));

        assert!(queue.push(WorkItem::LoadChunk(ChunkCoord::new(0, 0))));
        assert!(queue.push(WorkItem::LoadChunk(ChunkCoord::new(1, 0))));
        assert!(!queue.push(WorkItem::LoadChunk(ChunkCoord::new(2, 0))));

        assert_eq!(queue.len(), 2);
        assert_eq!(counters.snapshot().dropped, 1);
        assert_eq!(rx.recv().await, Some(WorkItem::LoadChunk(ChunkCoord::new(0, 0))));
        assert_eq!(rx.recv().await, Some(WorkItem::LoadChunk(ChunkCoord::new(1, 0))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn push_wakes_waiter() {
        let counters = Arc::new(SyncCounters::default());
        let (queue, _rx) = IngestQueue::channel(4, counters);
        queue.push(WorkItem::LoadChunk(ChunkCoord::new(0, 0)));
        // The permit stored by `notify_one` completes this immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), queue.notified())
            .await
            .expect("notified");
    }
}
