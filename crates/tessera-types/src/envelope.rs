//! The JSON datagram envelope published by the external world.
//!
//! ```json
//! {"event_type": "entity_built", "sequence": 42, "chunk": {"x": 0, "y": 0},
//!  "key": "belt-7", "category": "belt",
//!  "position": {"x": 10.5, "y": 3.5}, "direction": 2}
//! ```
//!
//! `event_type` selects topic routing in the hub. An `action_id` marks an
//! action completion, `chunk` plus `state` marks a chunk progress report,
//! and an operation-bearing `event_type` (see [`OperationKind::from_event_type`])
//! carries a store mutation. Every other field is kept in [`Envelope::extra`]
//! and becomes the operation payload.

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::chunk::ChunkCoord;
use crate::error::TypeError;
use crate::operation::{Operation, OperationKind, Payload};

/// A parsed datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic used for hub routing.
    pub event_type: String,
    /// Global sequence number, when the producer assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Correlation id of a completed action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    /// Chunk the event refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkCoord>,
    /// New snapshot state of `chunk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Stable identity of the row an operation targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Entity category of the target row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Remaining domain fields.
    #[serde(flatten)]
    pub extra: Payload,
}

impl Envelope {
    /// Create an envelope with only an event type set.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            sequence: None,
            action_id: None,
            chunk: None,
            state: None,
            key: None,
            category: None,
            extra: Payload::new(),
        }
    }

    /// Parse an envelope from raw datagram bytes.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] when the bytes are not a JSON
    /// object with an `event_type` string.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether this envelope reports the completion of an action.
    pub const fn is_action_completion(&self) -> bool {
        self.action_id.is_some()
    }

    /// The chunk and raw new state, when this envelope reports chunk progress.
    pub fn chunk_transition(&self) -> Option<(ChunkCoord, &str)> {
        match (self.chunk, self.state.as_deref()) {
            (Some(chunk), Some(state)) => Some((chunk, state)),
            _ => None,
        }
    }

    /// Convert an operation-bearing envelope into an [`Operation`].
    ///
    /// Returns `Ok(None)` when the event type carries no store mutation.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::MissingField`] when `key` is absent, or when
    /// `category` is absent on an upsert or configure. Returns
    /// [`TypeError::UnknownCategory`] for an unmappable category.
    pub fn to_operation(&self) -> Result<Option<Operation>, TypeError> {
        let Some(kind) = OperationKind::from_event_type(&self.event_type) else {
            return Ok(None);
        };
        let key = self.key.clone().ok_or_else(|| TypeError::MissingField {
            event_type: self.event_type.clone(),
            field: "key",
        })?;
        let category = self
            .category
            .as_deref()
            .map(str::parse::<Category>)
            .transpose()?;
        if category.is_none() && kind.writes_row() {
            return Err(TypeError::MissingField {
                event_type: self.event_type.clone(),
                field: "category",
            });
        }

        Ok(Some(Operation {
            kind,
            key,
            category,
            payload: self.extra.clone(),
            sequence: self.sequence,
            chunk: self.chunk,
            topic: self.event_type.clone(),
        }))
    }
}

/// A world position in tile units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// East-west coordinate.
    pub x: f64,
    /// North-south coordinate.
    pub y: f64,
}

impl Position {
    /// Create a position.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_operation_envelope_and_keeps_extra_fields() {
        let raw = br#"{"event_type":"entity_built","sequence":7,"chunk":{"x":0,"y":-1},
            "key":"belt-1","category":"belt","position":{"x":1.5,"y":-2.5},"direction":2}"#;
        let env = Envelope::from_slice(raw).unwrap();
        assert_eq!(env.sequence, Some(7));
        assert!(env.extra.contains_key("position"));
        assert!(env.extra.contains_key("direction"));

        let op = env.to_operation().unwrap().unwrap();
        assert_eq!(op.kind, OperationKind::Upsert);
        assert_eq!(op.key, "belt-1");
        assert_eq!(op.category, Some(Category::Belt));
        assert_eq!(op.chunk, Some(ChunkCoord::new(0, -1)));
        assert_eq!(op.direction().unwrap().map(u8::from), Some(2));
    }

    #[test]
    fn non_operation_events_produce_no_operation() {
        let mut env = Envelope::new("chunk_state");
        env.chunk = Some(ChunkCoord::new(1, 1));
        env.state = Some("persist".to_owned());
        assert!(env.to_operation().unwrap().is_none());
        assert_eq!(env.chunk_transition(), Some((ChunkCoord::new(1, 1), "persist")));
    }

    #[test]
    fn upsert_without_category_is_rejected() {
        let mut env = Envelope::new("upsert");
        env.key = Some("a".to_owned());
        assert!(matches!(
            env.to_operation(),
            Err(TypeError::MissingField { field: "category", .. })
        ));
    }

    #[test]
    fn remove_without_category_is_accepted() {
        let mut env = Envelope::new("entity_destroyed");
        env.key = Some("a".to_owned());
        let op = env.to_operation().unwrap().unwrap();
        assert_eq!(op.kind, OperationKind::Remove);
        assert!(op.category.is_none());
    }

    #[test]
    fn malformed_bytes_fail_to_parse() {
        assert!(Envelope::from_slice(b"not json").is_err());
        assert!(Envelope::from_slice(br#"{"sequence":1}"#).is_err());
    }

    #[test]
    fn action_completion_detected() {
        let env = Envelope::from_slice(br#"{"event_type":"action_done","action_id":"mine_1"}"#)
            .unwrap();
        assert!(env.is_action_completion());
    }
}
