//! Read queries over the world store.
//!
//! Reads may run concurrently with the ingestion engine. A read observed
//! while a drain is in progress is eventually consistent; callers that need
//! a settled view call `ensure_synced` first.

use std::collections::BTreeMap;

use serde::Serialize;
use tessera_types::ChunkCoord;

use crate::error::StoreError;
use crate::registry::ComponentTable;
use crate::sqlite::WorldStore;

/// A base row from `entities` or `resources`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct BaseRow {
    /// Stable identity.
    pub key: String,
    /// Category wire name.
    pub category: String,
    /// Prototype name (`iron-ore`, `transport-belt`, ...).
    pub name: Option<String>,
    /// East-west position.
    pub x: Option<f64>,
    /// North-south position.
    pub y: Option<f64>,
    /// Chunk column.
    pub chunk_x: Option<i32>,
    /// Chunk row.
    pub chunk_y: Option<i32>,
    /// Full payload the row was written from, as JSON text.
    pub payload: String,
}

/// A resource base row joined with its remaining yield.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ResourceRow {
    /// Stable identity.
    pub key: String,
    /// Category wire name (`resource` or `water`).
    pub category: String,
    /// Resource name.
    pub name: Option<String>,
    /// East-west position.
    pub x: Option<f64>,
    /// North-south position.
    pub y: Option<f64>,
    /// Remaining amount, when the category tracks one.
    pub amount: Option<i64>,
}

/// An entity with declared logistic neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LinkRow {
    /// Stable identity.
    pub key: String,
    /// Category wire name.
    pub category: String,
    /// Prototype name.
    pub name: Option<String>,
    /// JSON array of input keys.
    pub inputs: String,
    /// JSON array of output keys.
    pub outputs: String,
    /// Full payload, as JSON text.
    pub payload: String,
}

/// A complete row family: base row plus every component row.
///
/// Used to compare whole-store states (idempotence, replay equivalence).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFamily {
    /// Base table holding the row (`entities` or `resources`).
    pub base_table: &'static str,
    /// The base row.
    pub base: BaseRow,
    /// Component values keyed by component table name.
    pub components: BTreeMap<&'static str, String>,
}

const BASE_COLUMNS: &str = "key, category, name, x, y, chunk_x, chunk_y, payload";

impl WorldStore {
    /// Fetch the base row of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn get_entity(&self, key: &str) -> Result<Option<BaseRow>, StoreError> {
        let sql = format!("SELECT {BASE_COLUMNS} FROM entities WHERE key = ?1");
        let row = sqlx::query_as::<_, BaseRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Fetch the base row of a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn get_resource(&self, key: &str) -> Result<Option<BaseRow>, StoreError> {
        let sql = format!("SELECT {BASE_COLUMNS} FROM resources WHERE key = ?1");
        let row = sqlx::query_as::<_, BaseRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Orientation of an entity, if it has a direction component.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn direction_of(&self, key: &str) -> Result<Option<u8>, StoreError> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT direction FROM entity_direction WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.and_then(|v| u8::try_from(v).ok()))
    }

    /// Number of rows in the `entities` base table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn entity_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Number of rows in the `resources` base table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn resource_count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Number of rows in a component table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn component_count(&self, table: ComponentTable) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.table_name());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// All entity base rows located in `chunk`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn entities_in_chunk(&self, chunk: ChunkCoord) -> Result<Vec<BaseRow>, StoreError> {
        let sql = format!(
            "SELECT {BASE_COLUMNS} FROM entities WHERE chunk_x = ?1 AND chunk_y = ?2 ORDER BY key"
        );
        let rows = sqlx::query_as::<_, BaseRow>(&sql)
            .bind(chunk.x)
            .bind(chunk.y)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// All resource rows with their yields, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn resource_rows(&self) -> Result<Vec<ResourceRow>, StoreError> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r"SELECT r.key, r.category, r.name, r.x, r.y, y.amount
              FROM resources r
              LEFT JOIN resource_yield y ON y.key = r.key
              ORDER BY r.key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All entities carrying a links component, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn link_rows(&self) -> Result<Vec<LinkRow>, StoreError> {
        let rows = sqlx::query_as::<_, LinkRow>(
            r"SELECT e.key, e.category, e.name, l.inputs, l.outputs, e.payload
              FROM entities e
              JOIN entity_links l ON l.key = e.key
              ORDER BY e.key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every row family in the store, ordered by base table then key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if any query fails.
    pub async fn row_families(&self) -> Result<Vec<RowFamily>, StoreError> {
        let mut components: BTreeMap<String, BTreeMap<&'static str, String>> = BTreeMap::new();
        for table in ComponentTable::ALL {
            let sql = format!(
                "SELECT key, {} FROM {} ORDER BY key",
                table.value_expr(),
                table.table_name()
            );
            let rows: Vec<(String, String)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
            for (key, value) in rows {
                components
                    .entry(key)
                    .or_default()
                    .insert(table.table_name(), value);
            }
        }

        let mut families = Vec::new();
        for base_table in ["entities", "resources"] {
            let sql = format!("SELECT {BASE_COLUMNS} FROM {base_table} ORDER BY key");
            let rows = sqlx::query_as::<_, BaseRow>(&sql)
                .fetch_all(&self.pool)
                .await?;
            for base in rows {
                let comps = components.remove(&base.key).unwrap_or_default();
                families.push(RowFamily {
                    base_table,
                    base,
                    components: comps,
                });
            }
        }

        if !components.is_empty() {
            tracing::warn!(
                orphans = components.len(),
                "Component rows without a base row"
            );
        }
        Ok(families)
    }
}
