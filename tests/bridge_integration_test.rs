// Integration tests for the native side of the bridge
// Run with: cargo test --test bridge_integration_test

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;
use socketio_bridge::socket::{NativeArg, SharedListener};
use socketio_bridge::{
    Bridge, BridgeError, ConnectionState, LoopbackFactory, LoopbackSocket, SocketClient,
    SocketFactory, SocketOptions, TaggedPayload,
};

fn bridge() -> (Bridge, socketio_bridge::bridge::FanInReceiver, Arc<LoopbackFactory>) {
    let factory = Arc::new(LoopbackFactory::new());
    let (bridge, rx) = Bridge::new(Arc::clone(&factory) as Arc<dyn SocketFactory>);
    (bridge, rx, factory)
}

/// initialize → connect → native welcome event → tagged message on the fan-in channel
#[test]
fn test_welcome_round_trip() {
    let (bridge, mut rx, factory) = bridge();

    let mut outcome = Some(BridgeError::Destroyed);
    bridge.initialize("http://127.0.0.1:3000", &SocketOptions::default(), |e| {
        outcome = e;
    });
    assert!(outcome.is_none());

    let (event, id) = bridge.on(None, "welcome");
    bridge.connect(None);
    assert_eq!(bridge.state(None), ConnectionState::Connected);

    factory.last().unwrap().fire(
        "welcome",
        &[NativeArg::Json(json!({ "count": 3, "tags": ["a", "b"] }))],
    );

    let msg = rx.try_recv().expect("welcome should be delivered");
    assert_eq!(msg.event_name, event);
    assert_eq!(msg.unique_id, id);
    let TaggedPayload::Object(map) = msg.data else {
        panic!("expected object payload");
    };
    assert_eq!(map["count"], TaggedPayload::Integer(3));
}

/// A malformed address reports a configuration error and stores nothing
#[test]
fn test_invalid_uri_creates_no_entry() {
    let (bridge, _rx, factory) = bridge();

    let mut outcome = None;
    bridge.initialize("not a uri", &SocketOptions::default(), |e| outcome = e);

    assert!(matches!(outcome, Some(BridgeError::Configuration(_))));
    assert_eq!(bridge.connection_count(), 0);
    assert!(factory.sockets().is_empty());
}

/// Teardown with live listeners: later native events reach nobody
#[test]
fn test_teardown_with_two_listeners() {
    let (bridge, mut rx, factory) = bridge();
    bridge
        .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
        .unwrap();
    bridge.on(None, "welcome");
    bridge.on(None, "update");
    bridge.connect(None);
    let socket = factory.last().unwrap();

    drop(bridge);

    assert_eq!(socket.fire("welcome", &[]), 0);
    assert_eq!(socket.fire("update", &[]), 0);
    assert_eq!(socket.total_listener_count(), 0);
    assert!(rx.try_recv().is_err());
}

/// Listeners on separate paths only see their own connection's events
#[test]
fn test_paths_are_isolated() {
    let (bridge, mut rx, factory) = bridge();
    let chat = SocketOptions {
        path: Some("/chat".to_string()),
        ..SocketOptions::default()
    };

    bridge
        .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
        .unwrap();
    let default_socket = factory.last().unwrap();
    bridge.try_initialize("http://127.0.0.1:3000", &chat).unwrap();
    let chat_socket = factory.last().unwrap();

    let (_, chat_id) = bridge.on(Some("/chat"), "msg");
    default_socket.fire("msg", &[]);
    assert!(rx.try_recv().is_err());

    chat_socket.fire("msg", &[NativeArg::Json(json!("hi"))]);
    assert_eq!(rx.try_recv().unwrap().unique_id, chat_id);
}

/// Base options set before initialize reach the factory, call options win
#[test]
fn test_update_options_then_initialize() {
    let (bridge, _rx, factory) = bridge();
    bridge.update_options_sync(&SocketOptions {
        transports: Some(vec!["websocket".to_string()]),
        reconnection_delay: Some(500),
        ..SocketOptions::default()
    });

    bridge
        .try_initialize(
            "wss://example.com",
            &SocketOptions {
                reconnection_delay: Some(1000),
                ..SocketOptions::default()
            },
        )
        .unwrap();

    let socket = factory.last().unwrap();
    assert_eq!(socket.options().transports, Some(vec!["websocket".to_string()]));
    assert_eq!(socket.options().reconnection_delay, Some(1000));
}

/// Repeated re-initialization leaves no listeners on replaced sockets
#[test]
fn test_repeated_reinitialize_does_not_leak() {
    let (bridge, _rx, factory) = bridge();
    bridge
        .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
        .unwrap();
    bridge.on(None, "welcome");
    bridge.once(None, "ready");

    for port in 3001..3004 {
        bridge
            .try_initialize(&format!("http://127.0.0.1:{port}"), &SocketOptions::default())
            .unwrap();
    }

    let sockets = factory.sockets();
    let (last, older) = sockets.split_last().unwrap();
    for old in older {
        assert_eq!(old.total_listener_count(), 0);
    }
    assert_eq!(last.total_listener_count(), 2);
    assert_eq!(bridge.listener_count(), 2);
}

/// Native listeners may fire from another thread
#[test]
fn test_events_from_socket_thread() {
    let (bridge, mut rx, factory) = bridge();
    bridge
        .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
        .unwrap();
    bridge.on(None, "tick");
    let socket = factory.last().unwrap();

    let handle = std::thread::spawn(move || {
        for i in 0..10 {
            socket.fire("tick", &[NativeArg::Json(json!(i))]);
        }
    });
    handle.join().unwrap();

    let values: Vec<TaggedPayload> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|m| m.data)
        .collect();
    let expected: Vec<TaggedPayload> = (0..10).map(TaggedPayload::Integer).collect();
    assert_eq!(values, expected);
}

/// Loopback client whose `on`/`once` take a while, like a client that
/// registers handlers on its own event thread.
#[derive(Debug)]
struct SlowSocket {
    inner: LoopbackSocket,
    attach_delay: Duration,
}

impl SocketClient for SlowSocket {
    fn connect(&self) {
        self.inner.connect();
    }

    fn disconnect(&self) {
        self.inner.disconnect();
    }

    fn connected(&self) -> bool {
        self.inner.connected()
    }

    fn id(&self) -> Option<String> {
        self.inner.id()
    }

    fn emit(&self, event: &str, data: serde_json::Value) {
        self.inner.emit(event, data);
    }

    fn on(&self, event: &str, listener: SharedListener) {
        thread::sleep(self.attach_delay);
        self.inner.on(event, listener);
    }

    fn once(&self, event: &str, listener: SharedListener) {
        thread::sleep(self.attach_delay);
        self.inner.once(event, listener);
    }

    fn off(&self, event: &str, listener_id: &str) -> bool {
        self.inner.off(event, listener_id)
    }
}

#[derive(Debug, Default)]
struct SlowFactory {
    sockets: Mutex<Vec<Arc<SlowSocket>>>,
}

impl SocketFactory for SlowFactory {
    fn create(
        &self,
        url: &url::Url,
        options: &SocketOptions,
    ) -> anyhow::Result<Arc<dyn SocketClient>> {
        let socket = Arc::new(SlowSocket {
            inner: LoopbackSocket::new(url.clone(), options.clone(), false),
            attach_delay: Duration::from_millis(200),
        });
        self.sockets.lock().unwrap().push(Arc::clone(&socket));
        Ok(socket)
    }
}

fn slow_bridge() -> (Bridge, socketio_bridge::bridge::FanInReceiver, Arc<SlowFactory>) {
    let factory = Arc::new(SlowFactory::default());
    let (bridge, rx) = Bridge::new(Arc::clone(&factory) as Arc<dyn SocketFactory>);
    (bridge, rx, factory)
}

/// A listener still attaching when teardown starts is detached by it
#[test]
fn test_on_racing_destroy_leaves_no_listener() {
    let (bridge, mut rx, factory) = slow_bridge();
    bridge
        .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
        .unwrap();
    let socket = Arc::clone(&factory.sockets.lock().unwrap()[0]);

    thread::scope(|s| {
        let listening = s.spawn(|| bridge.on(None, "chat"));
        thread::sleep(Duration::from_millis(50));
        bridge.destroy();
        listening.join().unwrap();
    });

    assert_eq!(socket.inner.total_listener_count(), 0);
    assert_eq!(socket.inner.fire("chat", &[NativeArg::Json(json!(1))]), 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(bridge.listener_count(), 0);
    assert_eq!(bridge.connection_count(), 0);
}

/// A listener still attaching when its key is re-initialized ends up on the
/// new connection exactly once
#[test]
fn test_on_racing_reinitialize_lands_on_new_socket() {
    let (bridge, mut rx, factory) = slow_bridge();
    bridge
        .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
        .unwrap();

    let (_, id) = thread::scope(|s| {
        let listening = s.spawn(|| bridge.on(None, "chat"));
        thread::sleep(Duration::from_millis(50));
        bridge
            .try_initialize("http://127.0.0.1:4000", &SocketOptions::default())
            .unwrap();
        listening.join().unwrap()
    });

    let sockets = factory.sockets.lock().unwrap().clone();
    assert_eq!(sockets.len(), 2);
    assert_eq!(sockets[0].inner.listener_count("chat"), 0);
    assert_eq!(sockets[1].inner.listener_count("chat"), 1);
    assert_eq!(bridge.listener_count(), 1);

    assert_eq!(sockets[1].inner.fire("chat", &[NativeArg::Json(json!("hi"))]), 1);
    assert_eq!(rx.try_recv().unwrap().unique_id, id);
    assert!(rx.try_recv().is_err());
}

/// `initialize` after teardown is refused and builds no client
#[test]
fn test_initialize_after_destroy_is_refused() {
    let (bridge, _rx, factory) = slow_bridge();
    bridge.destroy();

    let result = bridge.try_initialize("http://127.0.0.1:3000", &SocketOptions::default());

    assert!(matches!(result, Err(BridgeError::Destroyed)));
    assert_eq!(bridge.connection_count(), 0);
    assert!(factory.sockets.lock().unwrap().is_empty());
}
