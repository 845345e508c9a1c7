//! Integration tests for row-family apply semantics.
//!
//! Each test opens a private in-memory `SQLite` store, so no external
//! services are needed.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use serde_json::json;
use tessera_store::{ApplyOutcome, ComponentTable, StoreError, WorldStore};
use tessera_types::{Category, ChunkCoord, Direction, Operation, Payload};

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().expect("payload must be an object")
}

fn belt(key: &str, x: f64, y: f64) -> Operation {
    let mut op = Operation::upsert(
        key,
        Category::Belt,
        payload(json!({"name": "transport-belt", "position": {"x": x, "y": y}, "direction": 0})),
    );
    op.resolve_chunk(32);
    op
}

async fn store() -> WorldStore {
    WorldStore::in_memory().await.expect("in-memory store")
}

#[tokio::test]
async fn upsert_remove_rotate_scenario_leaves_single_row() {
    let store = store().await;

    store.apply(&belt("A", 10.0, 10.0)).await.unwrap();
    store.apply(&belt("B", 10.0, 11.0)).await.unwrap();
    assert_eq!(store.apply(&Operation::remove("A")).await.unwrap(), ApplyOutcome::Removed);
    let rotate = Operation::rotate("B", Direction::try_from(2).unwrap());
    assert_eq!(store.apply(&rotate).await.unwrap(), ApplyOutcome::Rotated);

    assert_eq!(store.entity_count().await.unwrap(), 1);
    assert!(store.get_entity("A").await.unwrap().is_none());
    let b = store.get_entity("B").await.unwrap().expect("B present");
    assert_eq!(b.x, Some(10.0));
    assert_eq!(b.y, Some(11.0));
    assert_eq!(store.direction_of("B").await.unwrap(), Some(2));
    // Removing A cascaded through its components.
    assert_eq!(store.component_count(ComponentTable::Direction).await.unwrap(), 1);
    assert_eq!(store.component_count(ComponentTable::Links).await.unwrap(), 1);
}

#[tokio::test]
async fn remove_of_unknown_key_is_a_noop() {
    let store = store().await;
    let outcome = store.apply(&Operation::remove("ghost")).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Unchanged);
}

#[tokio::test]
async fn rotate_of_absent_entity_is_a_noop() {
    let store = store().await;
    let rotate = Operation::rotate("ghost", Direction::try_from(4).unwrap());
    assert_eq!(store.apply(&rotate).await.unwrap(), ApplyOutcome::Unchanged);
    assert_eq!(store.component_count(ComponentTable::Direction).await.unwrap(), 0);
}

#[tokio::test]
async fn rotate_only_touches_orientation() {
    let store = store().await;
    store.apply(&belt("B", 3.0, 4.0)).await.unwrap();
    let before = store.get_entity("B").await.unwrap();

    store
        .apply(&Operation::rotate("B", Direction::try_from(6).unwrap()))
        .await
        .unwrap();

    assert_eq!(store.get_entity("B").await.unwrap(), before);
    assert_eq!(store.direction_of("B").await.unwrap(), Some(6));
}

#[tokio::test]
async fn configure_is_a_full_refresh() {
    let store = store().await;
    let first = Operation::upsert(
        "asm",
        Category::Assembler,
        payload(json!({"recipe": "gear", "inventory": {"iron-plate": 4}})),
    );
    store.apply(&first).await.unwrap();

    let configure = Operation::configure("asm", Category::Assembler, payload(json!({})));
    assert_eq!(store.apply(&configure).await.unwrap(), ApplyOutcome::Written);

    // The refreshed payload declares no recipe, so none survives.
    assert_eq!(store.component_count(ComponentTable::Recipe).await.unwrap(), 0);
    assert_eq!(store.component_count(ComponentTable::Inventory).await.unwrap(), 1);
}

#[tokio::test]
async fn category_change_moves_base_table_and_drops_stale_components() {
    let store = store().await;
    store.apply(&belt("x", 1.0, 1.0)).await.unwrap();

    let as_resource = Operation::upsert(
        "x",
        Category::Resource,
        payload(json!({"name": "stone", "amount": 50, "position": {"x": 1.0, "y": 1.0}})),
    );
    store.apply(&as_resource).await.unwrap();

    assert!(store.get_entity("x").await.unwrap().is_none());
    assert!(store.get_resource("x").await.unwrap().is_some());
    assert_eq!(store.component_count(ComponentTable::Direction).await.unwrap(), 0);
    assert_eq!(store.component_count(ComponentTable::Yield).await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_without_category_is_an_apply_error() {
    let store = store().await;
    let mut op = belt("x", 0.0, 0.0);
    op.category = None;
    let err = store.apply(&op).await.unwrap_err();
    assert!(matches!(err, StoreError::Apply { .. }));
    assert_eq!(store.entity_count().await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_component_rolls_back_whole_family() {
    let store = store().await;
    let op = Operation::upsert(
        "bad",
        Category::Inserter,
        payload(json!({"inputs": "not-a-list"})),
    );
    assert!(store.apply(&op).await.is_err());
    assert_eq!(store.entity_count().await.unwrap(), 0);
    assert_eq!(store.component_count(ComponentTable::Direction).await.unwrap(), 0);
}

#[tokio::test]
async fn replaying_the_same_operations_is_idempotent() {
    let store = store().await;
    let ops = vec![
        belt("a", 1.0, 1.0),
        belt("b", 2.0, 2.0),
        Operation::rotate("a", Direction::try_from(4).unwrap()),
        Operation::remove("b"),
    ];

    for op in &ops {
        store.apply(op).await.unwrap();
    }
    let once = store.row_families().await.unwrap();
    for op in &ops {
        store.apply(op).await.unwrap();
    }
    let twice = store.row_families().await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(once.len(), 1);
}

#[tokio::test]
async fn purge_chunk_removes_only_that_chunk() {
    let store = store().await;
    store.apply(&belt("near", 1.0, 1.0)).await.unwrap();
    store.apply(&belt("far", 100.0, 1.0)).await.unwrap();
    let mut ore = Operation::upsert(
        "ore",
        Category::Resource,
        payload(json!({"name": "iron-ore", "amount": 10, "position": {"x": 2.0, "y": 2.0}})),
    );
    ore.resolve_chunk(32);
    store.apply(&ore).await.unwrap();

    let purged = store.purge_chunk(ChunkCoord::new(0, 0)).await.unwrap();

    assert_eq!(purged, 2);
    assert!(store.get_entity("far").await.unwrap().is_some());
    assert_eq!(store.resource_count().await.unwrap(), 0);
    assert_eq!(store.component_count(ComponentTable::Yield).await.unwrap(), 0);
    assert_eq!(store.component_count(ComponentTable::Direction).await.unwrap(), 1);
}

#[tokio::test]
async fn unplaced_upsert_keeps_the_stored_chunk() {
    let store = store().await;
    store.apply(&belt("b", 3.0, 3.0)).await.unwrap();

    // A later full refresh without a position must not orphan the row.
    let refresh = Operation::upsert(
        "b",
        Category::Belt,
        payload(json!({"name": "fast-transport-belt", "direction": 2})),
    );
    store.apply(&refresh).await.unwrap();
    assert_eq!(store.entities_in_chunk(ChunkCoord::new(0, 0)).await.unwrap().len(), 1);

    // A key that was never placed has no chunk to purge by.
    let loose = Operation::upsert("loose", Category::Container, payload(json!({})));
    store.apply(&loose).await.unwrap();

    assert_eq!(store.purge_chunk(ChunkCoord::new(0, 0)).await.unwrap(), 1);
    assert!(store.get_entity("b").await.unwrap().is_none());
    assert!(store.get_entity("loose").await.unwrap().is_some());
}

#[tokio::test]
async fn link_and_resource_rows_are_queryable() {
    let store = store().await;
    let inserter = Operation::upsert(
        "ins",
        Category::Inserter,
        payload(json!({"inputs": ["chest"], "outputs": ["furnace"]})),
    );
    store.apply(&inserter).await.unwrap();
    let ore = Operation::upsert("ore", Category::Resource, payload(json!({"amount": 75})));
    store.apply(&ore).await.unwrap();

    let links = store.link_rows().await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].inputs, r#"["chest"]"#);

    let resources = store.resource_rows().await.unwrap();
    assert_eq!(resources[0].amount, Some(75));
}
