//! Event fan-out for the Tessera synchronization engine.
//!
//! The external world publishes JSON envelopes as UDP datagrams. This crate
//! owns the receiving side:
//!
//! - [`hub`] -- [`EventHub`]: one socket, one listener thread, topic and
//!   wildcard subscriptions with panic isolation
//! - [`registry`] -- [`HubRegistry`]: one hub per bind address
//! - [`correlator`] -- [`Correlator`]: matches action completions to waiters
//! - [`error`] -- [`HubError`] and [`CorrelatorError`]

pub mod correlator;
pub mod error;
pub mod hub;
pub mod registry;

pub use correlator::Correlator;
pub use error::{CorrelatorError, HubError};
pub use hub::{EventHub, Handler, HubConfig, HubStats, MAX_DATAGRAM_BYTES, SubscriptionId, WILDCARD};
pub use registry::HubRegistry;
