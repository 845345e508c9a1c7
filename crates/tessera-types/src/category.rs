//! Entity categories and orientation.
//!
//! The category of an entity decides which base table its row lives in and
//! which component tables carry the rest of its row family. Category names
//! parse case-insensitively, ignoring surrounding whitespace.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Closed set of entity categories the store knows how to map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A minable resource deposit (ore, stone, oil).
    Resource,
    /// A water tile.
    Water,
    /// A transport belt segment.
    Belt,
    /// An inserter moving items between entities.
    Inserter,
    /// A fluid pipe.
    Pipe,
    /// An electric pole.
    Pole,
    /// A mining drill.
    Miner,
    /// A furnace.
    Furnace,
    /// An assembling machine.
    Assembler,
    /// A storage container.
    Container,
    /// Any other placed entity.
    Other,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Resource,
        Self::Water,
        Self::Belt,
        Self::Inserter,
        Self::Pipe,
        Self::Pole,
        Self::Miner,
        Self::Furnace,
        Self::Assembler,
        Self::Container,
        Self::Other,
    ];

    /// Wire name of the category.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Water => "water",
            Self::Belt => "belt",
            Self::Inserter => "inserter",
            Self::Pipe => "pipe",
            Self::Pole => "pole",
            Self::Miner => "miner",
            Self::Furnace => "furnace",
            Self::Assembler => "assembler",
            Self::Container => "container",
            Self::Other => "other",
        }
    }

    /// Whether rows of this category live in the `resources` base table.
    pub const fn is_resource(self) -> bool {
        matches!(self, Self::Resource | Self::Water)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| TypeError::UnknownCategory(s.to_owned()))
    }
}

/// One of the eight orientations an entity can face (`0` = north,
/// increasing clockwise in 45 degree steps).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Direction(u8);

impl Direction {
    /// Facing north.
    pub const NORTH: Self = Self(0);

    /// Raw orientation value in `0..=7`.
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Direction {
    type Error = TypeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= 7)
            .map(Self)
            .ok_or(TypeError::InvalidDirection(value))
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        direction.0
    }
}

impl From<Direction> for i64 {
    fn from(direction: Direction) -> Self {
        Self::from(direction.0)
    }
}
