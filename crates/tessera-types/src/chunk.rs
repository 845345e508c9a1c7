//! Chunk coordinates and the snapshot progress state machine.
//!
//! A chunk is a fixed-size square region of the external world and the unit
//! of snapshot granularity. The world writes one snapshot directory per
//! chunk and announces its progress through the states of [`ChunkState`].

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Integer coordinate pair identifying a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// Chunk column.
    pub x: i32,
    /// Chunk row.
    pub y: i32,
}

impl ChunkCoord {
    /// Create a chunk coordinate.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Return the chunk containing the world position `(x, y)`.
    ///
    /// Coordinates are floored, so `-0.5` belongs to chunk `-1`. A
    /// `chunk_size` of zero is treated as one.
    pub fn containing(x: f64, y: f64, chunk_size: u32) -> Self {
        let size = f64::from(chunk_size.max(1));
        Self {
            x: floor_to_i32(x / size),
            y: floor_to_i32(y / size),
        }
    }

    /// Directory name used for this chunk's snapshot files (`"{x}_{y}"`).
    pub fn dir_name(self) -> String {
        format!("{}_{}", self.x, self.y)
    }
}

/// Floor a float into the `i32` range, saturating at the bounds.
fn floor_to_i32(value: f64) -> i32 {
    let floored = value.floor();
    if floored.is_nan() {
        return 0;
    }
    let clamped = floored.clamp(f64::from(i32::MIN), f64::from(i32::MAX));
    // Clamped to the i32 range above, so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation)]
    let result = clamped as i32;
    result
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Snapshot progress of a chunk as reported by the external world.
///
/// States are ordered; the tracker only ever moves a chunk forward
/// through them, except on explicit invalidation back to [`ChunkState::Idle`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Nothing is known about the chunk yet.
    #[default]
    Idle,
    /// The world is discovering entities in the chunk.
    Discover,
    /// The world is serializing the chunk's contents.
    Serialize,
    /// The world is writing the snapshot files.
    Persist,
    /// Snapshot files are complete and safe to load.
    Complete,
}

impl ChunkState {
    /// Wire name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discover => "discover",
            Self::Serialize => "serialize",
            Self::Persist => "persist",
            Self::Complete => "complete",
        }
    }

    /// Whether the snapshot files for this state can be loaded.
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "discover" => Ok(Self::Discover),
            "serialize" => Ok(Self::Serialize),
            "persist" => Ok(Self::Persist),
            "complete" => Ok(Self::Complete),
            other => Err(TypeError::UnknownChunkState(other.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn containing_floors_negative_positions() {
        assert_eq!(ChunkCoord::containing(10.0, 10.0, 32), ChunkCoord::new(0, 0));
        assert_eq!(ChunkCoord::containing(-0.5, 31.9, 32), ChunkCoord::new(-1, 0));
        assert_eq!(ChunkCoord::containing(64.0, -64.0, 32), ChunkCoord::new(2, -2));
    }

    #[test]
    fn containing_treats_zero_size_as_one() {
        assert_eq!(ChunkCoord::containing(3.7, -2.2, 0), ChunkCoord::new(3, -3));
    }

    #[test]
    fn states_are_ordered_forward() {
        assert!(ChunkState::Idle < ChunkState::Discover);
        assert!(ChunkState::Discover < ChunkState::Serialize);
        assert!(ChunkState::Serialize < ChunkState::Persist);
        assert!(ChunkState::Persist < ChunkState::Complete);
    }

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!("COMPLETE".parse::<ChunkState>().unwrap(), ChunkState::Complete);
        assert_eq!(" persist ".parse::<ChunkState>().unwrap(), ChunkState::Persist);
        assert!("done".parse::<ChunkState>().is_err());
    }

    #[test]
    fn dir_name_keeps_sign() {
        assert_eq!(ChunkCoord::new(-3, 4).dir_name(), "-3_4");
    }
}
