//! Shared type definitions for the Tessera synchronization engine.
//!
//! Every crate in the workspace speaks the vocabulary defined here: chunk
//! coordinates and their snapshot states, entity categories, the datagram
//! envelope published by the external world, and the operations the
//! ingestion engine applies to the store.
//!
//! # Modules
//!
//! - [`chunk`] -- [`ChunkCoord`] and the forward-only [`ChunkState`] machine
//! - [`category`] -- [`Category`] and [`Direction`]
//! - [`envelope`] -- The JSON datagram [`Envelope`] and [`Position`]
//! - [`operation`] -- [`Operation`], [`OperationKind`] and file records
//! - [`error`] -- Conversion errors shared by the above

pub mod category;
pub mod chunk;
pub mod envelope;
pub mod error;
pub mod operation;

// Re-export all public types at crate root for convenience.
pub use category::{Category, Direction};
pub use chunk::{ChunkCoord, ChunkState};
pub use envelope::{Envelope, Position};
pub use error::TypeError;
pub use operation::{LogRecord, Operation, OperationKind, Payload, SnapshotRecord};
