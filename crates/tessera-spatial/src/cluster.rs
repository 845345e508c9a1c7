//! Density clustering of resource points into named patches.
//!
//! Points of the same resource name that lie within `radius` of each other
//! (transitively) form one patch. Neighbour search uses a uniform grid with
//! cell size `radius`, so each point is only compared with points in the
//! 3x3 block of cells around it.
//!
//! Output is independent of input order: points are sorted by name and key
//! before clustering, and patches are numbered by their first member.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tessera_types::Position;

use crate::bounds::{Bounds, centroid};
use crate::union_find::UnionFind;

/// One resource tile or deposit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourcePoint {
    /// Stable identity of the row.
    pub key: String,
    /// Resource name (`iron-ore`, `crude-oil`, ...).
    pub name: String,
    /// World position.
    pub position: Position,
    /// Remaining amount.
    pub amount: u64,
}

/// A cluster of same-named resource points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourcePatch {
    /// Deterministic patch name, `<resource>_<n>` with `n` starting at 1.
    pub name: String,
    /// Resource name shared by every member.
    pub resource: String,
    /// Member keys, sorted.
    pub members: Vec<String>,
    /// Mean member position.
    pub centroid: Position,
    /// Bounding box of member positions.
    pub bounds: Bounds,
    /// Sum of member amounts.
    pub total_yield: u64,
}

/// Grid cell containing `v` for cells of `size`.
#[allow(clippy::cast_possible_truncation)]
fn cell(v: f64, size: f64) -> i64 {
    // Float-to-int `as` saturates; NaN maps to 0.
    (v / size).floor() as i64
}

/// Cluster `points` into patches.
///
/// A non-positive or non-finite `radius` puts every point in its own patch.
pub fn cluster_points(points: &[ResourcePoint], radius: f64) -> Vec<ResourcePatch> {
    let mut by_name: BTreeMap<&str, Vec<&ResourcePoint>> = BTreeMap::new();
    for point in points {
        by_name.entry(point.name.as_str()).or_default().push(point);
    }

    let linking = radius > 0.0 && radius.is_finite();
    let mut patches = Vec::new();

    for (name, mut group) in by_name {
        group.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then(a.position.x.total_cmp(&b.position.x))
                .then(a.position.y.total_cmp(&b.position.y))
        });

        let mut uf = UnionFind::new(group.len());
        if linking {
            link_within_radius(&group, radius, &mut uf);
        }

        for (ordinal, members) in uf.groups().into_iter().enumerate() {
            let members: Vec<&ResourcePoint> =
                members.into_iter().filter_map(|i| group.get(i).copied()).collect();
            let positions: Vec<Position> = members.iter().map(|p| p.position).collect();
            let (Some(center), Some(bounds)) =
                (centroid(&positions), Bounds::around(positions.iter().copied()))
            else {
                continue;
            };
            let mut keys: Vec<String> = members.iter().map(|p| p.key.clone()).collect();
            keys.sort();
            patches.push(ResourcePatch {
                name: format!("{name}_{}", ordinal.saturating_add(1)),
                resource: name.to_owned(),
                members: keys,
                centroid: center,
                bounds,
                total_yield: members
                    .iter()
                    .fold(0_u64, |acc, p| acc.saturating_add(p.amount)),
            });
        }
    }

    tracing::debug!(
        points = points.len(),
        patches = patches.len(),
        radius,
        "Clustered resource points"
    );
    patches
}

fn link_within_radius(group: &[&ResourcePoint], radius: f64, uf: &mut UnionFind) {
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, point) in group.iter().enumerate() {
        let key = (cell(point.position.x, radius), cell(point.position.y, radius));
        grid.entry(key).or_default().push(i);
    }

    let r2 = radius * radius;
    for (i, point) in group.iter().enumerate() {
        let cx = cell(point.position.x, radius);
        let cy = cell(point.position.y, radius);
        for dx in -1_i64..=1 {
            for dy in -1_i64..=1 {
                let neighbours = grid.get(&(cx.saturating_add(dx), cy.saturating_add(dy)));
                for &j in neighbours.into_iter().flatten() {
                    if j <= i {
                        continue;
                    }
                    let Some(other) = group.get(j) else {
                        continue;
                    };
                    let ddx = point.position.x - other.position.x;
                    let ddy = point.position.y - other.position.y;
                    if ddx.mul_add(ddx, ddy * ddy) <= r2 {
                        uf.union(i, j);
                    }
                }
            }
        }
    }
}
