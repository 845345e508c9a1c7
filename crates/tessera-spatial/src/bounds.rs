//! Axis-aligned bounding boxes.

use serde::Serialize;
use tessera_types::Position;

/// Axis-aligned bounding box in tile units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    /// Smallest x.
    pub min_x: f64,
    /// Smallest y.
    pub min_y: f64,
    /// Largest x.
    pub max_x: f64,
    /// Largest y.
    pub max_y: f64,
}

impl Bounds {
    /// A degenerate box around a single point.
    pub const fn at(p: Position) -> Self {
        Self {
            min_x: p.x,
            min_y: p.y,
            max_x: p.x,
            max_y: p.y,
        }
    }

    /// Grow the box to contain `p`.
    #[must_use]
    pub const fn include(self, p: Position) -> Self {
        Self {
            min_x: self.min_x.min(p.x),
            min_y: self.min_y.min(p.y),
            max_x: self.max_x.max(p.x),
            max_y: self.max_y.max(p.y),
        }
    }

    /// Smallest box containing every point, or `None` for no points.
    pub fn around(points: impl IntoIterator<Item = Position>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        Some(points.fold(Self::at(first), Self::include))
    }

    /// Width of the box.
    pub const fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the box.
    pub const fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Arithmetic mean of `points`, or `None` for no points.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn centroid(points: &[Position]) -> Option<Position> {
    if points.is_empty() {
        return None;
    }
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let n = points.len() as f64;
    Some(Position::new(sx / n, sy / n))
}
