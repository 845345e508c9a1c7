//! Error types for the sync layer.
//!
//! Non-fatal conditions (malformed envelopes, queue saturation, sequence
//! gaps, rejected operations) are logged and counted in
//! [`SyncStats`](crate::SyncStats); they never surface here.

use std::path::PathBuf;
use std::time::Duration;

use tessera_hub::{CorrelatorError, HubError};
use tessera_store::StoreError;
use tessera_types::ChunkCoord;

use crate::config::ConfigError;

/// Errors raised while reading a chunk's snapshot files.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The chunk has no snapshot directory yet.
    #[error("no snapshot for chunk {chunk} at {}", path.display())]
    MissingSnapshot {
        /// The chunk requested.
        chunk: ChunkCoord,
        /// Directory that was expected.
        path: PathBuf,
    },

    /// A snapshot file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File or directory being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The store rejected the purge that precedes a reload.
    #[error("store error during load: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}

/// Errors raised by the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A chunk did not reach `Complete` in time.
    #[error("chunk {chunk} did not complete within {timeout:?}")]
    ChunkTimeout {
        /// The chunk awaited.
        chunk: ChunkCoord,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// An action completion did not arrive in time.
    #[error("action {action_id} did not complete within {timeout:?}")]
    ActionTimeout {
        /// Correlation id awaited.
        action_id: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// `ensure_synced_strict` ran out of time.
    #[error("store not settled within {timeout:?} ({unresolved} chunk(s) unresolved)")]
    SyncTimeout {
        /// Budget that expired.
        timeout: Duration,
        /// Required chunks that were not loaded.
        unresolved: usize,
    },

    /// Waiting for an action failed for a reason other than timeout.
    #[error("correlator error: {source}")]
    Correlator {
        /// The underlying correlator error.
        #[from]
        source: CorrelatorError,
    },

    /// The store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A chunk load failed.
    #[error("loader error: {source}")]
    Loader {
        /// The underlying loader error.
        #[from]
        source: LoaderError,
    },

    /// The event hub failed.
    #[error("hub error: {source}")]
    Hub {
        /// The underlying hub error.
        #[from]
        source: HubError,
    },

    /// Configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },
}
