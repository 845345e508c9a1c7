//! Static mapping from entity category to component tables.
//!
//! Each category owns a fixed list of component appliers. The mapping is
//! resolved once at startup into a [`ComponentRegistry`] and shared by
//! reference, so the apply path never dispatches on category strings.
//!
//! | Category | Components |
//! |----------|------------|
//! | `resource` | `resource_yield` |
//! | `water` | -- |
//! | `belt`, `inserter` | `entity_direction`, `entity_links` |
//! | `pipe`, `pole` | `entity_links` |
//! | `miner` | `entity_direction`, `entity_links` |
//! | `furnace` | `entity_recipe`, `entity_inventory` |
//! | `assembler` | `entity_direction`, `entity_recipe`, `entity_inventory` |
//! | `container` | `entity_inventory` |
//! | `other` | -- |

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use tessera_types::{Category, Operation};

use crate::error::StoreError;

/// A component table sharing the row family key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentTable {
    /// Orientation of placed entities.
    Direction,
    /// Active recipe of crafting entities.
    Recipe,
    /// Declared input and output neighbours of logistic entities.
    Links,
    /// Item contents.
    Inventory,
    /// Remaining amount of a resource deposit.
    Yield,
}

impl ComponentTable {
    /// Every component table. Removal walks this list before touching base rows.
    pub const ALL: [Self; 5] = [
        Self::Direction,
        Self::Recipe,
        Self::Links,
        Self::Inventory,
        Self::Yield,
    ];

    /// SQL table name.
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Direction => "entity_direction",
            Self::Recipe => "entity_recipe",
            Self::Links => "entity_links",
            Self::Inventory => "entity_inventory",
            Self::Yield => "resource_yield",
        }
    }

    /// Column holding orientation, for tables that declare one.
    pub const fn orientation_column(self) -> Option<&'static str> {
        match self {
            Self::Direction => Some("direction"),
            Self::Recipe | Self::Links | Self::Inventory | Self::Yield => None,
        }
    }

    /// SQL expression rendering the component's value as text.
    pub(crate) const fn value_expr(self) -> &'static str {
        match self {
            Self::Direction => "CAST(direction AS TEXT)",
            Self::Recipe => "recipe",
            Self::Links => "inputs || '|' || outputs",
            Self::Inventory => "contents",
            Self::Yield => "CAST(amount AS TEXT)",
        }
    }

    /// Write or replace this component's row for `op.key`.
    pub(crate) async fn write(
        self,
        conn: &mut SqliteConnection,
        op: &Operation,
    ) -> Result<(), StoreError> {
        let key = op.key.as_str();
        match self {
            Self::Direction => {
                let direction = op
                    .direction()
                    .map_err(|e| StoreError::apply(key, e.to_string()))?
                    .unwrap_or_default();
                sqlx::query(
                    r"INSERT INTO entity_direction (key, direction) VALUES (?1, ?2)
                      ON CONFLICT (key) DO UPDATE SET direction = excluded.direction",
                )
                .bind(key)
                .bind(i64::from(direction))
                .execute(&mut *conn)
                .await?;
            }
            Self::Recipe => {
                if let Some(recipe) = op.str_field("recipe") {
                    sqlx::query(
                        r"INSERT INTO entity_recipe (key, recipe) VALUES (?1, ?2)
                          ON CONFLICT (key) DO UPDATE SET recipe = excluded.recipe",
                    )
                    .bind(key)
                    .bind(recipe)
                    .execute(&mut *conn)
                    .await?;
                }
            }
            Self::Links => {
                let inputs = string_list(op, "inputs")?;
                let outputs = string_list(op, "outputs")?;
                sqlx::query(
                    r"INSERT INTO entity_links (key, inputs, outputs) VALUES (?1, ?2, ?3)
                      ON CONFLICT (key) DO UPDATE SET inputs = excluded.inputs,
                                                      outputs = excluded.outputs",
                )
                .bind(key)
                .bind(serde_json::to_string(&inputs)?)
                .bind(serde_json::to_string(&outputs)?)
                .execute(&mut *conn)
                .await?;
            }
            Self::Inventory => {
                let contents = match op.payload.get("inventory") {
                    None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
                    Some(v @ Value::Object(_)) => v.clone(),
                    Some(_) => return Err(StoreError::apply(key, "inventory must be an object")),
                };
                sqlx::query(
                    r"INSERT INTO entity_inventory (key, contents) VALUES (?1, ?2)
                      ON CONFLICT (key) DO UPDATE SET contents = excluded.contents",
                )
                .bind(key)
                .bind(serde_json::to_string(&contents)?)
                .execute(&mut *conn)
                .await?;
            }
            Self::Yield => {
                let amount = match op.payload.get("amount") {
                    None | Some(Value::Null) => 0,
                    Some(v) => v
                        .as_u64()
                        .and_then(|a| i64::try_from(a).ok())
                        .ok_or_else(|| StoreError::apply(key, "amount must be a non-negative integer"))?,
                };
                sqlx::query(
                    r"INSERT INTO resource_yield (key, amount) VALUES (?1, ?2)
                      ON CONFLICT (key) DO UPDATE SET amount = excluded.amount",
                )
                .bind(key)
                .bind(amount)
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }
}

/// Read an optional list-of-strings payload field.
fn string_list(op: &Operation, field: &str) -> Result<Vec<String>, StoreError> {
    match op.payload.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => Vec::<String>::deserialize(v)
            .map_err(|e| StoreError::apply(&op.key, format!("{field}: {e}"))),
    }
}

/// Category to component-table mapping, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    components: BTreeMap<Category, Vec<ComponentTable>>,
}

impl ComponentRegistry {
    /// The mapping used by the world's snapshot and event format.
    pub fn standard() -> Self {
        use ComponentTable::{Direction, Inventory, Links, Recipe, Yield};

        let components = Category::ALL
            .into_iter()
            .map(|category| {
                let tables = match category {
                    Category::Resource => vec![Yield],
                    Category::Water | Category::Other => Vec::new(),
                    Category::Belt | Category::Inserter | Category::Miner => {
                        vec![Direction, Links]
                    }
                    Category::Pipe | Category::Pole => vec![Links],
                    Category::Furnace => vec![Recipe, Inventory],
                    Category::Assembler => vec![Direction, Recipe, Inventory],
                    Category::Container => vec![Inventory],
                };
                (category, tables)
            })
            .collect();
        Self { components }
    }

    /// Component tables written for `category`.
    pub fn components_for(&self, category: Category) -> &[ComponentTable] {
        self.components.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
