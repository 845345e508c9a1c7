//! Store mutations and the file records they are read from.
//!
//! An [`Operation`] is ephemeral: the ingestion engine consumes it and the
//! only persisted result is the rows it writes. Live envelopes, snapshot
//! records and update-log records all convert into the same type so they
//! share a single apply path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::{Category, Direction};
use crate::chunk::ChunkCoord;
use crate::envelope::Position;
use crate::error::TypeError;

/// Free-form domain fields of an operation.
pub type Payload = serde_json::Map<String, Value>;

/// Topic recorded on operations read from snapshot files.
pub const SNAPSHOT_TOPIC: &str = "snapshot";

/// Topic recorded on operations replayed from the updates log.
pub const LOG_TOPIC: &str = "updates_log";

/// The four mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Write or replace a whole row family.
    Upsert,
    /// Delete a row family.
    Remove,
    /// Change only the orientation of an existing row family.
    Rotate,
    /// Refresh a row family after a configuration change.
    Configure,
}

impl OperationKind {
    /// Map an envelope `event_type` to the mutation it carries, if any.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "upsert" | "entity_built" | "entity_upserted" | "resource_upserted" => {
                Some(Self::Upsert)
            }
            "remove" | "entity_destroyed" | "entity_removed" | "resource_depleted" => {
                Some(Self::Remove)
            }
            "rotate" | "entity_rotated" => Some(Self::Rotate),
            "configure" | "entity_configured" => Some(Self::Configure),
            _ => None,
        }
    }

    /// Whether the kind writes a full row family (and so needs a category).
    pub const fn writes_row(self) -> bool {
        matches!(self, Self::Upsert | Self::Configure)
    }
}

/// A single store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// What to do.
    pub kind: OperationKind,
    /// Stable identity of the target row family.
    pub key: String,
    /// Category of the target; required for upsert and configure.
    pub category: Option<Category>,
    /// Domain fields (`position`, `direction`, `name`, ...).
    pub payload: Payload,
    /// Sequence number for live events; `None` for file replay.
    pub sequence: Option<u64>,
    /// Chunk the target belongs to, when known.
    pub chunk: Option<ChunkCoord>,
    /// Event type or file source the operation came from.
    pub topic: String,
}

impl Operation {
    /// Build an upsert of `key` with the given payload.
    pub fn upsert(key: impl Into<String>, category: Category, payload: Payload) -> Self {
        Self::build(OperationKind::Upsert, key.into(), Some(category), payload)
    }

    /// Build a configure of `key` with the given payload.
    pub fn configure(key: impl Into<String>, category: Category, payload: Payload) -> Self {
        Self::build(OperationKind::Configure, key.into(), Some(category), payload)
    }

    /// Build a removal of `key`.
    pub fn remove(key: impl Into<String>) -> Self {
        Self::build(OperationKind::Remove, key.into(), None, Payload::new())
    }

    /// Build a rotation of `key` to `direction`.
    pub fn rotate(key: impl Into<String>, direction: Direction) -> Self {
        let mut payload = Payload::new();
        payload.insert("direction".to_owned(), Value::from(u8::from(direction)));
        Self::build(OperationKind::Rotate, key.into(), None, payload)
    }

    fn build(kind: OperationKind, key: String, category: Option<Category>, payload: Payload) -> Self {
        Self {
            kind,
            key,
            category,
            payload,
            sequence: None,
            chunk: None,
            topic: String::from(match kind {
                OperationKind::Upsert => "upsert",
                OperationKind::Remove => "remove",
                OperationKind::Rotate => "rotate",
                OperationKind::Configure => "configure",
            }),
        }
    }

    /// Attach a sequence number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Attach a chunk.
    #[must_use]
    pub fn with_chunk(mut self, chunk: ChunkCoord) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Override the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// The `position` payload field, when present and well formed.
    pub fn position(&self) -> Option<Position> {
        self.payload
            .get("position")
            .and_then(|v| Position::deserialize(v).ok())
    }

    /// The `direction` payload field.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::InvalidField`] when the field is present but not
    /// an integer in `0..=7`.
    pub fn direction(&self) -> Result<Option<Direction>, TypeError> {
        match self.payload.get("direction") {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Direction::deserialize(v)
                .map(Some)
                .map_err(|e| TypeError::InvalidField {
                    field: "direction",
                    reason: e.to_string(),
                }),
        }
    }

    /// A string payload field.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Fill in `chunk` from the payload position when it is missing.
    ///
    /// Returns the resolved chunk, if any.
    pub fn resolve_chunk(&mut self, chunk_size: u32) -> Option<ChunkCoord> {
        if self.chunk.is_none() {
            self.chunk = self
                .position()
                .map(|p| ChunkCoord::containing(p.x, p.y, chunk_size));
        }
        self.chunk
    }
}

/// One line of a category-named snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Stable identity of the row family.
    pub key: String,
    /// Remaining fields of the record.
    #[serde(flatten)]
    pub payload: Payload,
}

impl SnapshotRecord {
    /// Convert into the upsert it describes.
    pub fn into_operation(self, category: Category, chunk: ChunkCoord) -> Operation {
        Operation::upsert(self.key, category, self.payload)
            .with_chunk(chunk)
            .with_topic(SNAPSHOT_TOPIC)
    }
}

/// One line of the append-only `updates` log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Mutation kind.
    pub op: OperationKind,
    /// Stable identity of the row family.
    pub key: String,
    /// Category of the row family.
    #[serde(default)]
    pub category: Option<Category>,
    /// Domain fields.
    #[serde(default)]
    pub payload: Payload,
}

impl LogRecord {
    /// Convert into the operation it describes.
    pub fn into_operation(self, chunk: ChunkCoord) -> Operation {
        Operation {
            kind: self.op,
            key: self.key,
            category: self.category,
            payload: self.payload,
            sequence: None,
            chunk: Some(chunk),
            topic: LOG_TOPIC.to_owned(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_type_mapping() {
        assert_eq!(OperationKind::from_event_type("entity_built"), Some(OperationKind::Upsert));
        assert_eq!(OperationKind::from_event_type("resource_depleted"), Some(OperationKind::Remove));
        assert_eq!(OperationKind::from_event_type("entity_rotated"), Some(OperationKind::Rotate));
        assert_eq!(
            OperationKind::from_event_type("entity_configured"),
            Some(OperationKind::Configure)
        );
        assert_eq!(OperationKind::from_event_type("chunk_state"), None);
    }

    #[test]
    fn resolve_chunk_from_position() {
        let payload = json!({"position": {"x": 40.0, "y": -1.0}});
        let mut op = Operation::upsert("a", Category::Belt, payload.as_object().unwrap().clone());
        assert_eq!(op.resolve_chunk(32), Some(ChunkCoord::new(1, -1)));
    }

    #[test]
    fn resolve_chunk_keeps_explicit_chunk() {
        let payload = json!({"position": {"x": 40.0, "y": 40.0}});
        let mut op = Operation::upsert("a", Category::Belt, payload.as_object().unwrap().clone())
            .with_chunk(ChunkCoord::new(5, 5));
        assert_eq!(op.resolve_chunk(32), Some(ChunkCoord::new(5, 5)));
    }

    #[test]
    fn invalid_direction_is_reported() {
        let payload = json!({"direction": "north"});
        let op = Operation::upsert("a", Category::Belt, payload.as_object().unwrap().clone());
        assert!(op.direction().is_err());
    }

    #[test]
    fn log_record_parses_with_defaults() {
        let record: LogRecord = serde_json::from_str(r#"{"op":"remove","key":"x"}"#).unwrap();
        let op = record.into_operation(ChunkCoord::new(0, 0));
        assert_eq!(op.kind, OperationKind::Remove);
        assert_eq!(op.topic, LOG_TOPIC);
        assert!(op.sequence.is_none());
    }

    #[test]
    fn snapshot_record_becomes_upsert() {
        let record: SnapshotRecord =
            serde_json::from_str(r#"{"key":"ore-1","name":"iron-ore","amount":500}"#).unwrap();
        let op = record.into_operation(Category::Resource, ChunkCoord::new(2, 3));
        assert_eq!(op.kind, OperationKind::Upsert);
        assert_eq!(op.str_field("name"), Some("iron-ore"));
        assert_eq!(op.chunk, Some(ChunkCoord::new(2, 3)));
    }
}
