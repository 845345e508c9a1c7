//! Derived spatial views, recomputed from the store on every call.
//!
//! Call [`SyncEngine::ensure_synced`](crate::SyncEngine::ensure_synced)
//! first for a settled view; otherwise the result reflects whatever the
//! store holds at read time.

use tessera_spatial::{
    LinkComponent, LinkNode, ResourcePatch, ResourcePoint, TilePatch, cluster_points,
    flood_fill_tiles, link_components,
};
use tessera_store::{LinkRow, StoreError, WorldStore};
use tessera_types::{Category, Position};

/// Reads rows from a store and runs the spatial algorithms over them.
#[derive(Debug, Clone)]
pub struct Derivations {
    store: WorldStore,
}

impl Derivations {
    /// Derive from `store`.
    pub const fn new(store: WorldStore) -> Self {
        Self { store }
    }

    /// Every minable resource tile as a clustering input. Rows without a
    /// position or name are skipped; a missing amount counts as zero.
    pub async fn resource_points(&self) -> Result<Vec<ResourcePoint>, StoreError> {
        let rows = self.store.resource_rows().await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.category == Category::Resource.as_str())
            .filter_map(|row| {
                let (Some(x), Some(y), Some(name)) = (row.x, row.y, row.name) else {
                    return None;
                };
                Some(ResourcePoint {
                    key: row.key,
                    name,
                    position: Position::new(x, y),
                    amount: row
                        .amount
                        .and_then(|a| u64::try_from(a).ok())
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    /// Positions of every water tile.
    pub async fn water_positions(&self) -> Result<Vec<Position>, StoreError> {
        let rows = self.store.resource_rows().await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.category == Category::Water.as_str())
            .filter_map(|row| Some(Position::new(row.x?, row.y?)))
            .collect())
    }

    /// Every entity with declared inputs or outputs.
    pub async fn link_nodes(&self) -> Result<Vec<LinkNode>, StoreError> {
        let rows = self.store.link_rows().await?;
        Ok(rows.into_iter().map(link_node).collect())
    }

    /// Resource patches: same-name tiles within `radius` of each other.
    pub async fn resource_patches(&self, radius: f64) -> Result<Vec<ResourcePatch>, StoreError> {
        let points = self.resource_points().await?;
        let patches = cluster_points(&points, radius);
        tracing::debug!(points = points.len(), patches = patches.len(), "Clustered resources");
        Ok(patches)
    }

    /// Water bodies: 8-connected regions of water tiles.
    pub async fn water_patches(&self) -> Result<Vec<TilePatch>, StoreError> {
        let positions = self.water_positions().await?;
        Ok(flood_fill_tiles(&positions))
    }

    /// Connected components of the logistics link graph, largest first.
    pub async fn link_components(
        &self,
        sample_size: usize,
    ) -> Result<Vec<LinkComponent>, StoreError> {
        let nodes = self.link_nodes().await?;
        Ok(link_components(&nodes, sample_size))
    }
}

fn link_node(row: LinkRow) -> LinkNode {
    let parse = |raw: &str, field: &str| {
        serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|e| {
            tracing::debug!(key = %row.key, field, error = %e, "Unreadable link list");
            Vec::new()
        })
    };
    let inputs = parse(&row.inputs, "inputs");
    let outputs = parse(&row.outputs, "outputs");
    LinkNode {
        key: row.key,
        inputs,
        outputs,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use serde_json::json;
    use tessera_types::Operation;

    use super::*;

    fn payload(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    async fn seeded() -> Derivations {
        let store = WorldStore::in_memory().await.unwrap();
        let ops = [
            Operation::upsert(
                "ore-a",
                Category::Resource,
                payload(json!({"name": "iron-ore", "position": {"x": 0.5, "y": 0.5}, "amount": 100})),
            ),
            Operation::upsert(
                "ore-b",
                Category::Resource,
                payload(json!({"name": "iron-ore", "position": {"x": 1.5, "y": 0.5}, "amount": 50})),
            ),
            Operation::upsert(
                "ore-far",
                Category::Resource,
                payload(json!({"name": "iron-ore", "position": {"x": 40.5, "y": 40.5}, "amount": 10})),
            ),
            Operation::upsert(
                "w1",
                Category::Water,
                payload(json!({"position": {"x": 5.5, "y": 5.5}})),
            ),
            Operation::upsert(
                "w2",
                Category::Water,
                payload(json!({"position": {"x": 6.5, "y": 6.5}})),
            ),
            Operation::upsert(
                "miner",
                Category::Miner,
                payload(json!({"outputs": ["belt"]})),
            ),
            Operation::upsert(
                "belt",
                Category::Belt,
                payload(json!({"inputs": ["miner"], "outputs": ["furnace-in"]})),
            ),
            Operation::upsert(
                "furnace-in",
                Category::Inserter,
                payload(json!({"inputs": ["belt"]})),
            ),
        ];
        for op in &ops {
            store.apply(op).await.unwrap();
        }
        Derivations::new(store)
    }

    #[tokio::test]
    async fn resource_patches_from_store() {
        let derive = seeded().await;
        let patches = derive.resource_patches(2.0).await.unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].members, ["ore-a", "ore-b"]);
        assert_eq!(patches[0].total_yield, 150);
        assert_eq!(patches[1].members, ["ore-far"]);
    }

    #[tokio::test]
    async fn diagonal_water_is_one_body() {
        let derive = seeded().await;
        let bodies = derive.water_patches().await.unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].tile_count, 2);
    }

    #[tokio::test]
    async fn link_graph_forms_one_component() {
        let derive = seeded().await;
        let components = derive.link_components(5).await.unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].node_count, 3);
        assert_eq!(components[0].sources, ["miner"]);
        assert_eq!(components[0].sinks, ["furnace-in"]);
    }
}
