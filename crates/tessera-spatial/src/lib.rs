//! Spatial derivations over the synced world.
//!
//! Every algorithm is a pure function over plain inputs and recomputes from
//! scratch; callers read rows from the store and pass them in.
//!
//! - [`cluster`] -- group resource points into named patches
//! - [`flood`] -- 8-connected tile regions (water bodies)
//! - [`graph`] -- components of the directed input/output link graph
//! - [`union_find`] -- the disjoint-set forest all three build on
//! - [`bounds`] -- bounding boxes

pub mod bounds;
pub mod cluster;
pub mod flood;
pub mod graph;
pub mod union_find;

pub use bounds::Bounds;
pub use cluster::{ResourcePatch, ResourcePoint, cluster_points};
pub use flood::{Tile, TilePatch, flood_fill_tiles};
pub use graph::{LinkComponent, LinkNode, link_components};
pub use union_find::UnionFind;
