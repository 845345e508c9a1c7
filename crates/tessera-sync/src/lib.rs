//! Ingestion, chunk tracking and snapshot loading for the Tessera
//! synchronization engine.
//!
//! This crate keeps a local [`WorldStore`](tessera_store::WorldStore)
//! consistent with an external world that publishes per-chunk snapshot files
//! and a lossy stream of live events. All writes are serialized through the
//! [`SyncEngine`]; readers call [`SyncEngine::ensure_synced`] when they need
//! a settled view.
//!
//! # Modules
//!
//! - [`config`] -- `tessera-config.yaml` loading into typed sections
//! - [`context`] -- [`SyncContext`]: config, hub registry, store connection
//! - [`engine`] -- [`SyncEngine`]: the write-locked drain and `ensure_synced`
//! - [`queue`] -- The bounded, drop-newest [`IngestQueue`]
//! - [`sequence`] -- Sequence-gap detection
//! - [`tracker`] -- Forward-only [`ChunkTracker`]
//! - [`loader`] -- [`SnapshotLoader`] for category files and the updates log
//! - [`derive`] -- [`Derivations`] over store rows
//! - [`stats`] -- Ingestion counters and [`SyncStats`]
//! - [`error`] -- [`SyncError`] and [`LoaderError`]

pub mod config;
pub mod context;
pub mod derive;
pub mod engine;
pub mod error;
pub mod loader;
pub mod queue;
pub mod sequence;
pub mod stats;
pub mod tracker;

pub use config::{ConfigError, SyncConfig};
pub use context::SyncContext;
pub use derive::Derivations;
pub use engine::{SweepReport, SyncEngine, SyncReport};
pub use error::{LoaderError, SyncError};
pub use loader::{ChunkFiles, LoadReport, SnapshotLoader};
pub use queue::{IngestQueue, WorkItem};
pub use sequence::{GapRange, SequenceScope, SequenceTracker, SequenceVerdict};
pub use stats::{GapRecord, SyncStats};
pub use tracker::{ChunkRecord, ChunkTracker};
