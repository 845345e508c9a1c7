//! 8-connectivity flood fill over tile positions.
//!
//! World positions are floored to integer tiles; tiles touching on an edge
//! or a corner belong to the same patch.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tessera_types::Position;

use crate::bounds::{Bounds, centroid};
use crate::union_find::UnionFind;

/// An integer tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Tile {
    /// Column.
    pub x: i64,
    /// Row.
    pub y: i64,
}

impl Tile {
    /// Tile containing a world position.
    #[allow(clippy::cast_possible_truncation)]
    pub fn containing(p: Position) -> Self {
        Self {
            x: p.x.floor() as i64,
            y: p.y.floor() as i64,
        }
    }

    /// Lower corner of the tile in world coordinates.
    #[allow(clippy::cast_precision_loss)]
    pub const fn origin(self) -> Position {
        Position::new(self.x as f64, self.y as f64)
    }

    /// Center of the tile in world coordinates.
    pub const fn center(self) -> Position {
        let o = self.origin();
        Position::new(o.x + 0.5, o.y + 0.5)
    }

    /// Upper corner of the tile in world coordinates.
    pub const fn far_corner(self) -> Position {
        let o = self.origin();
        Position::new(o.x + 1.0, o.y + 1.0)
    }

    fn neighbours(self) -> impl Iterator<Item = Self> {
        [-1_i64, 0, 1].into_iter().flat_map(move |dx| {
            [-1_i64, 0, 1].into_iter().filter_map(move |dy| {
                (dx != 0 || dy != 0).then(|| Self {
                    x: self.x.saturating_add(dx),
                    y: self.y.saturating_add(dy),
                })
            })
        })
    }
}

/// A connected region of tiles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TilePatch {
    /// Member tiles, sorted.
    pub tiles: Vec<Tile>,
    /// Mean of tile centers.
    pub centroid: Position,
    /// Box spanning the member tiles' full area.
    pub bounds: Bounds,
    /// Number of distinct tiles.
    pub tile_count: usize,
}

/// Group `positions` into 8-connected tile patches, ordered by first tile.
pub fn flood_fill_tiles(positions: &[Position]) -> Vec<TilePatch> {
    let tiles: BTreeSet<Tile> = positions.iter().copied().map(Tile::containing).collect();
    let index: BTreeMap<Tile, usize> = tiles.iter().copied().zip(0..).collect();
    let ordered: Vec<Tile> = tiles.into_iter().collect();

    let mut uf = UnionFind::new(ordered.len());
    for (i, tile) in ordered.iter().enumerate() {
        for neighbour in tile.neighbours() {
            if let Some(&j) = index.get(&neighbour) {
                uf.union(i, j);
            }
        }
    }

    let patches: Vec<TilePatch> = uf
        .groups()
        .into_iter()
        .filter_map(|group| {
            let members: Vec<Tile> = group
                .into_iter()
                .filter_map(|i| ordered.get(i).copied())
                .collect();
            let centers: Vec<Position> = members.iter().map(|t| t.center()).collect();
            let center = centroid(&centers)?;
            let bounds = Bounds::around(
                members
                    .iter()
                    .flat_map(|t| [t.origin(), t.far_corner()]),
            )?;
            Some(TilePatch {
                tile_count: members.len(),
                tiles: members,
                centroid: center,
                bounds,
            })
        })
        .collect();

    tracing::debug!(
        positions = positions.len(),
        patches = patches.len(),
        "Flood-filled tiles"
    );
    patches
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]
mod tests {
    use super::*;

    fn at(x: f64, y: f64) -> Position {
        Position::new(x, y)
    }

    #[test]
    fn diagonal_neighbours_share_a_patch() {
        let patches = flood_fill_tiles(&[at(0.5, 0.5), at(1.5, 1.5)]);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].tile_count, 2);
    }

    #[test]
    fn two_tile_gap_separates_patches() {
        let patches = flood_fill_tiles(&[at(0.0, 0.0), at(3.0, 0.0)]);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].tiles, [Tile { x: 0, y: 0 }]);
        assert_eq!(patches[1].tiles, [Tile { x: 3, y: 0 }]);
    }

    #[test]
    fn positions_in_one_tile_collapse() {
        let patches = flood_fill_tiles(&[at(2.1, 2.1), at(2.9, 2.2), at(2.5, 2.5)]);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].tile_count, 1);
        assert_eq!(patches[0].centroid, at(2.5, 2.5));
    }

    #[test]
    fn negative_coordinates_floor_downwards() {
        let patches = flood_fill_tiles(&[at(-0.5, -0.5), at(0.5, 0.5)]);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].tiles[0], Tile { x: -1, y: -1 });
    }

    #[test]
    fn bounds_cover_whole_tiles() {
        let patches = flood_fill_tiles(&[at(0.2, 0.2), at(1.7, 0.3), at(2.4, 0.9)]);
        assert_eq!(patches.len(), 1);
        let b = patches[0].bounds;
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (0.0, 0.0, 3.0, 1.0));
        assert_eq!(patches[0].centroid, at(1.5, 0.5));
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(flood_fill_tiles(&[]).is_empty());
    }
}
