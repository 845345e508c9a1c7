//! Error types for the daemon binary.

use tessera_hub::HubError;
use tessera_sync::SyncError;

/// Top-level error for the daemon.
///
/// Each variant wraps a subsystem error so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Configuration, store, or engine setup failed.
    #[error("sync error: {source}")]
    Sync {
        /// The underlying sync error.
        #[from]
        source: SyncError,
    },

    /// The hub listener could not be started.
    #[error("hub error: {source}")]
    Hub {
        /// The underlying hub error.
        #[from]
        source: HubError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
