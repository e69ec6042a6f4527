use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hollow_relay::{DatagramReceiver, StateStore};
use relay_proto::UpdateMessage;
use serde_json::{json, Value};

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn state(value: Value) -> relay_proto::StateSnapshot {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn start() -> (DatagramReceiver, Arc<StateStore>, UdpSocket) {
    let store = Arc::new(StateStore::new());
    let receiver = DatagramReceiver::spawn_with(
        "127.0.0.1:0",
        Arc::clone(&store),
        Duration::from_millis(20),
    )
    .expect("spawn receiver");
    let game = UdpSocket::bind("127.0.0.1:0").expect("bind game");
    game.connect(receiver.local_addr()).expect("connect");
    (receiver, store, game)
}

#[test_timeout::timeout]
fn full_then_partial_update_reaches_the_store() {
    let (receiver, store, game) = start();

    game.send(&UpdateMessage::Full(state(json!({"a": 1}))).to_bytes())
        .expect("send full");
    assert!(wait_until(Duration::from_secs(2), || store.get("a").is_some()));

    game.send(&UpdateMessage::Partial(state(json!({"b": 2}))).to_bytes())
        .expect("send partial");
    assert!(wait_until(Duration::from_secs(2), || store.len() == 2));

    assert_eq!(store.snapshot(), state(json!({"a": 1, "b": 2})));
    assert!(store.is_connected());
    assert_eq!(receiver.stats().applied(), 2);
}

#[test_timeout::timeout]
fn malformed_and_unknown_datagrams_do_not_stop_the_receiver() {
    let (receiver, store, game) = start();

    game.send(b"not json at all").expect("send garbage");
    game.send(br#"{"type":"reset_done"}"#).expect("send unknown");
    game.send(br#"{"type":"partial_update"}"#).expect("send missing state");
    game.send(br#"{"type":"full_update","state":{"scene":"Town"}}"#)
        .expect("send full");

    assert!(wait_until(Duration::from_secs(2), || store.get("scene").is_some()));
    assert!(receiver.is_listening());
    assert_eq!(receiver.stats().unknown(), 1);
    assert_eq!(receiver.stats().dropped(), 2);
}

#[test_timeout::timeout]
fn stopped_receiver_leaves_store_readable() {
    let (mut receiver, store, game) = start();
    game.send(br#"{"type":"full_update","state":{"hp":5}}"#)
        .expect("send");
    assert!(wait_until(Duration::from_secs(2), || store.get("hp").is_some()));

    receiver.stop();
    assert!(!receiver.is_running());
    assert_eq!(store.get("hp"), Some(json!(5)));
}
