//! Client façade integration tests
//!
//! Routing, dedup and failover run against `MockedTransport`; the end-to-end
//! case uses the scripted channel server.

mod common;

use chanlink_client::{AsyncClient, ClientBuilder, ClientConfig, ManualFocus};
use chanlink_core::{ChannelMessage, TransportKind};
use common::{created, mocked_factory, test_config, wait_until, MockChannelServer};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config() -> ClientConfig {
    ClientConfig::new("ws://localhost:9", "ref", "secret")
}

fn recorder() -> (
    Arc<Mutex<Vec<ChannelMessage>>>,
    impl Fn(ChannelMessage) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |msg| sink.lock().unwrap().push(msg))
}

#[tokio::test]
async fn test_first_transport_from_list() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config().with_transports([TransportKind::Sse, TransportKind::Ws]))
        .with_transport_factory(factory)
        .build()
        .unwrap();

    assert_eq!(client.transport_name(), TransportKind::Sse);
    assert!(!client.connected());

    client.connect();
    assert!(client.connected());
    assert_eq!(created(&transports, 0).connects(), 1);

    client.disconnect();
    assert!(!client.connected());
    assert_eq!(created(&transports, 0).disconnects(), 1);
}

#[tokio::test]
async fn test_duplicates_delivered_once() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config())
        .with_transport_factory(factory)
        .build()
        .unwrap();
    let (seen, callback) = recorder();
    client.listen_event("orders.created", callback);

    let transport = created(&transports, 0);
    let msg = ChannelMessage::new("42", "orders.created", "", json!({"n": 1}));
    transport.emit(msg.clone());
    transport.emit(msg.clone());
    transport.emit(ChannelMessage::new("43", "orders.created", "", json!({"n": 2})));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].message_id, "42");
    assert_eq!(seen[1].message_id, "43");
}

#[tokio::test]
async fn test_duplicates_pass_when_dedup_disabled() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config().without_dedup())
        .with_transport_factory(factory)
        .build()
        .unwrap();
    let (seen, callback) = recorder();
    client.listen_event("a.b", callback);

    let msg = ChannelMessage::new("1", "a.b", "", "x");
    created(&transports, 0).emit(msg.clone());
    created(&transports, 0).emit(msg);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_one_novelty_check_for_all_matching_subscribers() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config())
        .with_transport_factory(factory)
        .build()
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for (tag, pattern) in [("exact", "quick.orange.rabbit"), ("star", "quick.orange.*"), ("hash", "quick.#")] {
        let order = Arc::clone(&order);
        client.listen_event(pattern, move |_| order.lock().unwrap().push(tag));
    }
    client.listen_event("lazy.#.rabbit", |_| panic!("must not match"));
    assert_eq!(client.subscription_count(), 4);

    let msg = ChannelMessage::new("9", "quick.orange.rabbit", "", "");
    created(&transports, 0).emit(msg.clone());
    created(&transports, 0).emit(msg);

    assert_eq!(*order.lock().unwrap(), vec!["exact", "star", "hash"]);
}

#[tokio::test]
async fn test_no_bindings_notices() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config())
        .with_transport_factory(factory)
        .build()
        .unwrap();
    let transport = created(&transports, 0);

    transport.emit(ChannelMessage::new("1", "quick.white.male.bird", "", ""));
    client.listen_event("quick.orange.*", |_| panic!("must not match"));
    transport.emit(ChannelMessage::new("2", "quick.white.male.bird", "", ""));

    assert_eq!(
        transport.sent(),
        vec![
            "NoBindings::quick.white.male.bird".to_string(),
            "NoBindings::quick.white.male.bird".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_token_rotation_not_routed() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config())
        .with_transport_factory(factory)
        .build()
        .unwrap();
    let (seen, callback) = recorder();
    client.listen_event("#", callback);

    let transport = created(&transports, 0);
    transport.emit(ChannelMessage::new("t", ":n_token", "", "rotated"));

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(client.credentials().token(), "rotated");
    assert_eq!(transport.token(), "rotated");
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_fatal_error_fails_over_to_next_transport() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config())
        .with_transport_factory(factory)
        .build()
        .unwrap();
    client.connect();

    let ws = created(&transports, 0);
    ws.fail();

    assert_eq!(client.transport_name(), TransportKind::Sse);
    assert_eq!(ws.disconnects(), 1);
    let sse = created(&transports, 1);
    assert_eq!(sse.connects(), 1);
    assert!(client.connected());

    // subscriptions and dedup survive the swap
    let (seen, callback) = recorder();
    client.listen_event("a.b", callback);
    sse.emit(ChannelMessage::new("1", "a.b", "", ""));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_and_non_fatal_errors_ignored() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config())
        .with_transport_factory(factory)
        .build()
        .unwrap();

    let ws = created(&transports, 0);
    ws.report(TransportKind::Sse, 1);
    ws.report(TransportKind::Ws, 2);

    assert_eq!(client.transport_name(), TransportKind::Ws);
    assert_eq!(transports.lock().unwrap().len(), 1);
    assert_eq!(ws.disconnects(), 0);
}

#[tokio::test]
async fn test_failover_exhaustion() {
    let exhausted = Arc::new(AtomicUsize::new(0));
    let (factory, transports) = mocked_factory();
    let client = {
        let exhausted = Arc::clone(&exhausted);
        ClientBuilder::new(config().with_max_reconnect_attempts(2))
            .with_transport_factory(factory)
            .on_exhausted(move || {
                exhausted.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap()
    };
    client.connect();

    created(&transports, 0).fail();
    created(&transports, 1).fail();
    assert!(!client.is_exhausted());
    created(&transports, 2).fail();

    assert!(client.is_exhausted());
    assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    assert_eq!(transports.lock().unwrap().len(), 3);
    assert_eq!(client.transport_name(), TransportKind::Ws);

    // repeated reports after exhaustion change nothing
    created(&transports, 2).fail();
    assert_eq!(exhausted.load(Ordering::SeqCst), 1);

    // a manual connect starts over
    client.connect();
    assert!(!client.is_exhausted());
    assert!(client.connected());
}

#[tokio::test]
async fn test_restart_after_exhaustion_fails_over_to_other_transport() {
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config().with_max_reconnect_attempts(2))
        .with_transport_factory(factory)
        .build()
        .unwrap();
    client.connect();

    for i in 0..3 {
        created(&transports, i).fail();
    }
    assert!(client.is_exhausted());
    assert_eq!(client.transport_name(), TransportKind::Ws);

    client.connect();
    assert_eq!(created(&transports, 2).connects(), 2);

    created(&transports, 2).fail();
    assert_eq!(transports.lock().unwrap().len(), 4);
    assert_eq!(client.transport_name(), TransportKind::Sse);
    assert_eq!(created(&transports, 3).connects(), 1);
}

#[tokio::test]
async fn test_focus_reconnects_unless_clean_disconnect() {
    let focus = ManualFocus::new();
    let (factory, transports) = mocked_factory();
    let client = ClientBuilder::new(config())
        .with_transport_factory(factory)
        .with_focus_source(focus.clone())
        .build()
        .unwrap();
    assert_eq!(focus.handler_count(), 1);
    let transport = created(&transports, 0);

    focus.notify_focus();
    assert_eq!(transport.connects(), 1);

    client.disconnect();
    focus.notify_focus();
    assert_eq!(transport.connects(), 1);

    client.connect();
    focus.notify_focus();
    assert_eq!(transport.connects(), 3);
}

#[tokio::test]
async fn test_focus_disabled_by_config() {
    let focus = ManualFocus::new();
    let (factory, _transports) = mocked_factory();
    let _client = ClientBuilder::new(config().with_focus_reconnect(false))
        .with_transport_factory(factory)
        .with_focus_source(focus.clone())
        .build()
        .unwrap();
    assert_eq!(focus.handler_count(), 0);
}

#[tokio::test]
async fn test_end_to_end_over_websocket() {
    let server = MockChannelServer::start("secret").await;
    let config = test_config(&server.url(), "secret").with_transports([TransportKind::Ws]);
    let client = AsyncClient::new(config).unwrap();

    let (seen, callback) = recorder();
    client.listen_event("person.registered", callback);
    assert!(!client.connected());

    client.connect();
    assert!(wait_until(Duration::from_secs(5), || client.connected()).await);

    server.push(ChannelMessage::new("12", "person.registered", "", "CC111222"));
    assert!(wait_until(Duration::from_secs(5), || !seen.lock().unwrap().is_empty()).await);

    // the server redelivers; the cache keeps it to one delivery
    server.push(ChannelMessage::new("12", "person.registered", "", "CC111222"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload, json!("CC111222"));
    assert!(server.has_received("Ack::12"));

    client.disconnect();
}
