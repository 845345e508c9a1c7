//! Local spatial store for the Tessera synchronization engine.
//!
//! The store holds the synced world as row families: one base row (in
//! `entities` or `resources`) plus zero or more component rows keyed by the
//! same identity. It is backed by `SQLite` through [`sqlx`].
//!
//! # Schema
//!
//! ```text
//! entities / resources        base rows (key, category, name, x, y, chunk, payload)
//!     |
//!     +-- entity_direction    orientation (rotate touches only this)
//!     +-- entity_recipe       active recipe
//!     +-- entity_links        declared inputs / outputs
//!     +-- entity_inventory    item contents
//!     +-- resource_yield      remaining deposit amount
//! ```
//!
//! # Modules
//!
//! - [`sqlite`] -- Connection pool, configuration, migrations
//! - [`registry`] -- Static category to component-table mapping
//! - [`apply`] -- Upsert / remove / rotate / configure and chunk purge
//! - [`query`] -- Read queries and row types
//! - [`error`] -- Shared error types

pub mod apply;
pub mod error;
pub mod query;
pub mod registry;
pub mod sqlite;

// Re-export primary types for convenience.
pub use apply::ApplyOutcome;
pub use error::StoreError;
pub use query::{BaseRow, LinkRow, ResourceRow, RowFamily};
pub use registry::{ComponentRegistry, ComponentTable};
pub use sqlite::{MEMORY_URL, StoreConfig, WorldStore};
