//! Error types for the store.
//!
//! All errors are propagated via [`StoreError`] which wraps the underlying
//! [`sqlx`] and [`serde_json`] errors, plus [`StoreError::Apply`] for
//! operations that cannot be mapped onto the schema.

/// Errors that can occur in the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation could not be mapped onto the schema.
    #[error("cannot apply operation on {key}: {reason}")]
    Apply {
        /// Key of the rejected operation.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Build an [`StoreError::Apply`] for `key`.
    pub fn apply(key: &str, reason: impl Into<String>) -> Self {
        Self::Apply {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}
