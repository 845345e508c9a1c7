//! Error types for the `tessera-types` crate.

/// Errors raised while converting raw wire values into typed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// A chunk state string did not name a known state.
    #[error("unknown chunk state: {0}")]
    UnknownChunkState(String),

    /// A category string did not name a known entity category.
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    /// A direction value was outside `0..=7`.
    #[error("direction out of range: {0}")]
    InvalidDirection(i64),

    /// A payload field was present but had the wrong shape.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// The offending payload field.
        field: &'static str,
        /// Why it could not be read.
        reason: String,
    },

    /// An operation-bearing envelope was missing a required field.
    #[error("event {event_type} is missing field `{field}`")]
    MissingField {
        /// The event type of the offending envelope.
        event_type: String,
        /// The absent field.
        field: &'static str,
    },
}
