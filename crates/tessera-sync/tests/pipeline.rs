//! End-to-end: datagrams over loopback into a hub, through the engine, into
//! the store.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::net::UdpSocket;
use std::time::Duration;

use tessera_sync::{SyncConfig, SyncContext};
use tessera_types::ChunkCoord;

fn context(snapshot_root: &std::path::Path) -> SyncContext {
    let yaml = format!(
        "hub:\n  bind_addr: \"127.0.0.1:0\"\n  read_timeout_ms: 20\nsnapshots:\n  root: \"{}\"\n",
        snapshot_root.display()
    );
    SyncContext::new(SyncConfig::parse_raw(&yaml).expect("config"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn datagrams_flow_into_the_store() {
    let tmp = tempfile::tempdir().unwrap();
    let chunk = ChunkCoord::new(0, 0);
    let dir = tmp.path().join(chunk.dir_name());
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("water.jsonl"),
        "{\"key\":\"w1\",\"position\":{\"x\":8.5,\"y\":8.5}}\n{\"key\":\"w2\",\"position\":{\"x\":9.5,\"y\":9.5}}\n",
    )
    .unwrap();

    let ctx = context(tmp.path());
    let store = ctx.connect_store().await.unwrap();
    let engine = ctx.start_engine(store);
    let hub = ctx.hub().unwrap();
    engine.attach(&hub);
    hub.run().unwrap();

    engine.register_action("build_1");

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    let send = |payload: &str| {
        client.send_to(payload.as_bytes(), hub.local_addr()).unwrap();
    };
    send(r#"{"event_type":"entity_built","sequence":1,"key":"belt-1","category":"belt","position":{"x":2.5,"y":2.5},"direction":2}"#);
    send(r#"not json at all"#);
    send(r#"{"event_type":"chunk_state","chunk":{"x":0,"y":0},"state":"complete"}"#);
    send(r#"{"event_type":"action_done","action_id":"build_1"}"#);

    let done = engine
        .wait_for_action("build_1", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(done.event_type, "action_done");

    // Datagrams are handled in arrival order, so by now the chunk report
    // has been seen too.
    let report = engine
        .ensure_synced(Duration::from_secs(2), &[chunk])
        .await
        .unwrap();
    assert!(!report.timed_out);
    assert!(engine.is_chunk_loaded(chunk));

    let water = tessera_sync::Derivations::new(engine.store().clone())
        .water_patches()
        .await
        .unwrap();
    assert_eq!(water.len(), 1);
    assert_eq!(water.first().map(|p| p.tile_count), Some(2));
    assert!(hub.stats().malformed >= 1);

    engine.shutdown().await;
    ctx.reset();
}
