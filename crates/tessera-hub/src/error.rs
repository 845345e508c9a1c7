//! Error types for the hub and the correlator.
//!
//! Malformed envelopes, unknown correlations and handler panics are not
//! errors here: the hub logs and counts them so dispatch never stops.

use std::net::SocketAddr;
use std::time::Duration;

/// Errors raised by the event hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The UDP socket could not be bound. Fatal at startup.
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Transport {
        /// Address that was requested.
        addr: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// A socket or thread operation failed after binding.
    #[error("hub I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `run` was called while the listener thread is alive.
    #[error("hub listener on {addr} is already running")]
    AlreadyRunning {
        /// Local address of the running hub.
        addr: SocketAddr,
    },
}

/// Errors raised while waiting for an action completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelatorError {
    /// No completion arrived in time. The pending action has been removed.
    #[error("action {action_id} did not complete within {timeout:?}")]
    Timeout {
        /// Correlation id that was awaited.
        action_id: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The id was never registered, or its waiter was already taken.
    #[error("action {action_id} is not registered")]
    NotRegistered {
        /// Correlation id that was awaited.
        action_id: String,
    },

    /// The pending action was replaced by a newer registration of the same id.
    #[error("action {action_id} was cancelled")]
    Cancelled {
        /// Correlation id that was awaited.
        action_id: String,
    },
}
