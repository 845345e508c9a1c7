//! Integration tests sending real datagrams to a running hub over loopback.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::panic
)]

use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use tessera_hub::{Correlator, CorrelatorError, EventHub, HubConfig, HubRegistry, WILDCARD};
use tessera_types::Envelope;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn running_hub() -> EventHub {
    let mut config = HubConfig::new("127.0.0.1:0");
    config.read_timeout = Duration::from_millis(20);
    let hub = EventHub::bind(config).expect("bind loopback hub");
    hub.run().expect("start listener");
    hub
}

fn send(hub: &EventHub, payload: &str) {
    let client = UdpSocket::bind("127.0.0.1:0").expect("client socket");
    client
        .send_to(payload.as_bytes(), hub.local_addr())
        .expect("send datagram");
}

#[test]
fn datagrams_reach_topic_and_wildcard_subscribers() {
    let hub = running_hub();
    let (topic_tx, topic_rx) = mpsc::channel::<Envelope>();
    let (all_tx, all_rx) = mpsc::channel::<Envelope>();
    hub.subscribe("entity_built", move |e| {
        let _ = topic_tx.send(e.clone());
    });
    hub.subscribe(WILDCARD, move |e| {
        let _ = all_tx.send(e.clone());
    });

    send(&hub, r#"{"event_type":"entity_built","sequence":1,"key":"belt-1"}"#);
    send(&hub, r#"{"event_type":"chunk_state","chunk":{"x":0,"y":0},"state":"persist"}"#);

    let built = topic_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(built.key.as_deref(), Some("belt-1"));
    assert_eq!(built.sequence, Some(1));

    let first = all_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let second = all_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    let mut types = [first.event_type, second.event_type];
    types.sort();
    assert_eq!(types, ["chunk_state".to_owned(), "entity_built".to_owned()]);
    assert!(topic_rx.recv_timeout(Duration::from_millis(100)).is_err());

    hub.stop();
}

#[test]
fn listener_survives_garbage_and_panicking_handlers() {
    let hub = running_hub();
    let (tx, rx) = mpsc::channel::<String>();
    hub.subscribe("boom", |_| panic!("handler failure"));
    hub.subscribe(WILDCARD, move |e| {
        let _ = tx.send(e.event_type.clone());
    });

    send(&hub, "\u{0}\u{1}garbage");
    send(&hub, r#"{"event_type":"boom"}"#);
    send(&hub, r#"{"event_type":"after"}"#);

    let mut seen = vec![
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
    ];
    seen.sort();
    assert_eq!(seen, ["after", "boom"]);

    let stats = hub.stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.handler_panics, 1);
    hub.stop();
}

#[tokio::test]
async fn correlator_resolves_completion_sent_over_the_wire() {
    let registry = HubRegistry::new();
    let hub = registry
        .get_or_bind(&HubConfig::new("127.0.0.1:0"))
        .expect("bind");
    hub.run().expect("run");
    let correlator = Arc::new(Correlator::new());
    correlator.attach(&hub);

    correlator.register("mine_1");
    correlator.register("mine_2");
    send(&hub, r#"{"event_type":"action_completed","action_id":"mine_2","result":"ok"}"#);

    let done = correlator
        .wait("mine_2", Duration::from_secs(2))
        .await
        .expect("mine_2 completes");
    assert_eq!(done.extra.get("result").and_then(|v| v.as_str()), Some("ok"));

    let err = correlator
        .wait("mine_1", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, CorrelatorError::Timeout { .. }));
    assert_eq!(correlator.pending_count(), 0);

    registry.reset();
}
