//! Ingestion counters and the diagnostics snapshot built from them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_types::ChunkCoord;

use crate::sequence::GapRange;

/// Number of recent gaps kept for diagnostics.
const RECENT_GAPS: usize = 64;

/// A detected sequence gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapRecord {
    /// Event type of the operation that revealed the gap.
    pub topic: String,
    /// The missing range.
    pub range: GapRange,
    /// Chunk marked stale, or `None` when every known chunk was.
    pub chunk: Option<ChunkCoord>,
    /// When the gap was detected.
    pub detected_at: DateTime<Utc>,
}

/// Shared counters, updated lock-free from the hub thread and the drain task.
#[derive(Debug, Default)]
pub struct SyncCounters {
    pub(crate) applied: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) duplicates: AtomicU64,
    pub(crate) late_fills: AtomicU64,
    pub(crate) gaps: AtomicU64,
    pub(crate) global_gaps: AtomicU64,
    pub(crate) chunk_loads: AtomicU64,
    pub(crate) load_failures: AtomicU64,
    recent_gaps: Mutex<VecDeque<GapRecord>>,
}

impl SyncCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gap(&self, record: GapRecord) {
        Self::bump(&self.gaps);
        if record.chunk.is_none() {
            Self::bump(&self.global_gaps);
        }
        let mut recent = self.recent_gaps.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() >= RECENT_GAPS {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    /// Copy the counters into a serializable snapshot.
    pub fn snapshot(&self) -> SyncStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SyncStats {
            applied: load(&self.applied),
            failed: load(&self.failed),
            rejected: load(&self.rejected),
            dropped: load(&self.dropped),
            duplicates: load(&self.duplicates),
            late_fills: load(&self.late_fills),
            gaps: load(&self.gaps),
            global_gaps: load(&self.global_gaps),
            chunk_loads: load(&self.chunk_loads),
            load_failures: load(&self.load_failures),
            recent_gaps: self
                .recent_gaps
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect(),
        }
    }
}

/// Point-in-time ingestion diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Operations written to the store.
    pub applied: u64,
    /// Operations the store rejected.
    pub failed: u64,
    /// Envelopes that could not be converted into an operation.
    pub rejected: u64,
    /// Work items dropped because the queue was full.
    pub dropped: u64,
    /// Operations skipped as already seen.
    pub duplicates: u64,
    /// Skipped operations whose sequence fell inside a recorded gap.
    pub late_fills: u64,
    /// Sequence gaps detected.
    pub gaps: u64,
    /// Gaps on chunkless events, which stale every known chunk.
    pub global_gaps: u64,
    /// Successful chunk loads.
    pub chunk_loads: u64,
    /// Failed chunk loads.
    pub load_failures: u64,
    /// The most recent gaps, oldest first.
    pub recent_gaps: Vec<GapRecord>,
}
