//! Per-kind apply semantics for row families.
//!
//! Every apply runs in one transaction, so a failed operation leaves no
//! partial row family behind, and every apply is idempotent by key so it is
//! safe to re-run after cancellation or replay.
//!
//! Ordering enforces referential integrity without foreign keys: upsert
//! writes the base row before its components, remove deletes components
//! before the base row.

use sqlx::SqliteConnection;
use tessera_types::{Category, ChunkCoord, Operation, OperationKind};

use crate::error::StoreError;
use crate::registry::ComponentTable;
use crate::sqlite::WorldStore;

/// What an apply did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A row family was written or replaced.
    Written,
    /// A row family was deleted.
    Removed,
    /// Orientation columns were updated.
    Rotated,
    /// The target did not exist; nothing changed.
    Unchanged,
}

/// Chunk recorded for `key` in either base table.
async fn stored_chunk(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<ChunkCoord>, StoreError> {
    let row: Option<(Option<i32>, Option<i32>)> = sqlx::query_as(
        r"SELECT chunk_x, chunk_y FROM entities WHERE key = ?1
          UNION ALL
          SELECT chunk_x, chunk_y FROM resources WHERE key = ?1
          LIMIT 1",
    )
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.and_then(|(x, y)| Some(ChunkCoord::new(x?, y?))))
}

/// Base table for a category and the base table it must not also live in.
const fn base_tables(category: Category) -> (&'static str, &'static str) {
    if category.is_resource() {
        ("resources", "entities")
    } else {
        ("entities", "resources")
    }
}

impl WorldStore {
    /// Apply a single operation.
    ///
    /// `configure` is a full refresh and behaves exactly like `upsert`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Apply`] when the operation cannot be mapped
    /// onto the schema (missing category, malformed component field) and
    /// [`StoreError::Sqlx`] when the database rejects the write.
    pub async fn apply(&self, op: &Operation) -> Result<ApplyOutcome, StoreError> {
        match op.kind {
            OperationKind::Upsert | OperationKind::Configure => self.upsert(op).await,
            OperationKind::Remove => self.remove(&op.key).await,
            OperationKind::Rotate => self.rotate(op).await,
        }
    }

    async fn upsert(&self, op: &Operation) -> Result<ApplyOutcome, StoreError> {
        let category = op
            .category
            .ok_or_else(|| StoreError::apply(&op.key, "upsert requires a category"))?;
        let (base, other) = base_tables(category);
        let position = op.position();
        let payload = serde_json::to_string(&op.payload)?;

        let mut tx = self.pool.begin().await?;
        // An upsert that cannot place itself keeps the chunk already on file,
        // so the row stays reachable by `purge_chunk`.
        let chunk = match op.chunk {
            Some(chunk) => Some(chunk),
            None => stored_chunk(&mut tx, &op.key).await?,
        };

        // Components of a previous incarnation of this key may not apply to
        // the new category.
        for table in ComponentTable::ALL {
            let sql = format!("DELETE FROM {} WHERE key = ?1", table.table_name());
            sqlx::query(&sql).bind(&op.key).execute(&mut *tx).await?;
        }
        let sql = format!("DELETE FROM {other} WHERE key = ?1");
        sqlx::query(&sql).bind(&op.key).execute(&mut *tx).await?;

        let sql = format!(
            r"INSERT INTO {base} (key, category, name, x, y, chunk_x, chunk_y, payload)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
              ON CONFLICT (key) DO UPDATE SET
                category = excluded.category,
                name = excluded.name,
                x = excluded.x,
                y = excluded.y,
                chunk_x = excluded.chunk_x,
                chunk_y = excluded.chunk_y,
                payload = excluded.payload"
        );
        sqlx::query(&sql)
            .bind(&op.key)
            .bind(category.as_str())
            .bind(op.str_field("name"))
            .bind(position.map(|p| p.x))
            .bind(position.map(|p| p.y))
            .bind(chunk.map(|c| c.x))
            .bind(chunk.map(|c| c.y))
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        for table in self.registry.components_for(category) {
            table.write(&mut tx, op).await?;
        }

        tx.commit().await?;
        tracing::trace!(key = %op.key, category = %category, "Upserted row family");
        Ok(ApplyOutcome::Written)
    }

    async fn remove(&self, key: &str) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        for table in ComponentTable::ALL {
            let sql = format!("DELETE FROM {} WHERE key = ?1", table.table_name());
            sqlx::query(&sql).bind(key).execute(&mut *tx).await?;
        }
        let mut removed: u64 = 0;
        for base in ["entities", "resources"] {
            let sql = format!("DELETE FROM {base} WHERE key = ?1");
            let result = sqlx::query(&sql).bind(key).execute(&mut *tx).await?;
            removed = removed.saturating_add(result.rows_affected());
        }

        tx.commit().await?;
        if removed == 0 {
            tracing::trace!(key, "Remove of unknown key ignored");
            Ok(ApplyOutcome::Unchanged)
        } else {
            Ok(ApplyOutcome::Removed)
        }
    }

    async fn rotate(&self, op: &Operation) -> Result<ApplyOutcome, StoreError> {
        let direction = op
            .direction()
            .map_err(|e| StoreError::apply(&op.key, e.to_string()))?
            .ok_or_else(|| StoreError::apply(&op.key, "rotate requires a direction"))?;

        let mut tx = self.pool.begin().await?;

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE key = ?1")
            .bind(&op.key)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            tx.rollback().await?;
            tracing::trace!(key = %op.key, "Rotate of absent entity ignored");
            return Ok(ApplyOutcome::Unchanged);
        }

        for table in ComponentTable::ALL {
            if let Some(column) = table.orientation_column() {
                let sql = format!("UPDATE {} SET {column} = ?1 WHERE key = ?2", table.table_name());
                sqlx::query(&sql)
                    .bind(i64::from(direction))
                    .bind(&op.key)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(ApplyOutcome::Rotated)
    }

    /// Delete every row family whose base row lies in `chunk`.
    ///
    /// Used before an authoritative reload so rows removed from the world
    /// while notifications were lost do not survive. Returns the number of
    /// base rows deleted. Rows that were never placed in a chunk (no
    /// position, no chunk, no earlier placement) are not reachable here and
    /// survive every reload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the delete fails.
    pub async fn purge_chunk(&self, chunk: ChunkCoord) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        for table in ComponentTable::ALL {
            let sql = format!(
                r"DELETE FROM {} WHERE key IN (
                    SELECT key FROM entities WHERE chunk_x = ?1 AND chunk_y = ?2
                    UNION
                    SELECT key FROM resources WHERE chunk_x = ?1 AND chunk_y = ?2)",
                table.table_name()
            );
            sqlx::query(&sql)
                .bind(chunk.x)
                .bind(chunk.y)
                .execute(&mut *tx)
                .await?;
        }

        let mut purged: u64 = 0;
        for base in ["entities", "resources"] {
            let sql = format!("DELETE FROM {base} WHERE chunk_x = ?1 AND chunk_y = ?2");
            let result = sqlx::query(&sql)
                .bind(chunk.x)
                .bind(chunk.y)
                .execute(&mut *tx)
                .await?;
            purged = purged.saturating_add(result.rows_affected());
        }

        tx.commit().await?;
        tracing::debug!(%chunk, purged, "Purged chunk rows");
        Ok(purged)
    }
}
