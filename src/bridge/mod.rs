//! The bridge module: boundary-facing operations over native sockets.
//!
//! [`Bridge`] composes the [`ListenerRegistry`], the [`ConnectionDirectory`]
//! and the payload normalizer. Every operation takes an optional path key
//! (`None` selects `/socket.io`) and treats an unknown key as a silent no-op.
//!
//! # Architecture
//!
//! ```text
//! consumer (Lua)                      Bridge                       SocketClient
//!     │ on(path, event) ────────►  registry.register_and_attach() ►  socket.on(binding)
//!     │ ◄──── (event, uniqueID)        │                                │
//!     │                                │                 fires event    │
//!     │ ◄──── BoundaryMessage ◄──── binding.on_event() ◄────────────────┘
//!     │        (fan-in channel)
//! ```
//!
//! # Connection lifecycle
//!
//! `Uninitialized → Initialized → Connected ⇄ Disconnected → Destroyed`.
//! [`Bridge::destroy`] (also run on drop) clears the registry before
//! releasing connections, so no handler fires against a half-torn-down
//! socket. After destroy every operation is a no-op.
//!
//! # Concurrency
//!
//! Operations that touch both the registry and the directory (listen, off,
//! initialize, destroy) each run as one critical section under the registry
//! lock, so a listener can never end up attached to a socket the registry
//! no longer tracks. The `destroyed` flag is only a fast path; the registry's
//! own closed state decides.

pub mod channel;
pub mod directory;
pub mod options;
pub mod payload;
pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BridgeError;
use crate::socket::{SocketClient, SocketFactory};

pub use channel::{fan_in_channel, BoundaryMessage, FanInReceiver, FanInSender, FAN_IN_CHANNEL};
pub use directory::{ConnectionDirectory, Initialized, PendingConnection};
pub use options::{path_key, serialize_query, SocketOptions, DEFAULT_PATH};
pub use payload::{normalize_inbound, normalize_outbound, TaggedPayload};
pub use registry::{ListenerBinding, ListenerRegistry};

/// Observable state of one connection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection stored under the key.
    Uninitialized,
    /// Built but never asked to connect.
    Initialized,
    /// Connection open.
    Connected,
    /// Previously asked to connect, currently closed.
    Disconnected,
    /// The bridge has been torn down.
    Destroyed,
}

/// Native side of the boundary.
pub struct Bridge {
    registry: ListenerRegistry,
    directory: ConnectionDirectory,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.registry)
            .field("directory", &self.directory)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Bridge {
    /// Create a bridge and the consumer end of its fan-in channel.
    #[must_use]
    pub fn new(factory: Arc<dyn SocketFactory>) -> (Self, FanInReceiver) {
        let (tx, rx) = fan_in_channel();
        let bridge = Self {
            registry: ListenerRegistry::new(tx),
            directory: ConnectionDirectory::new(factory),
            destroyed: AtomicBool::new(false),
        };
        (bridge, rx)
    }

    /// Build (or replace) the connection for the effective path and report
    /// the outcome through `callback`, which runs exactly once.
    pub fn initialize<F>(&self, url: &str, options: &SocketOptions, callback: F)
    where
        F: FnOnce(Option<BridgeError>),
    {
        callback(self.try_initialize(url, options).err());
    }

    /// [`Bridge::initialize`] returning the directory key on success.
    ///
    /// Re-initializing a key detaches every listener from the replaced
    /// connection and re-attaches it to the new one.
    pub fn try_initialize(&self, url: &str, options: &SocketOptions) -> Result<String, BridgeError> {
        if self.is_destroyed() {
            return Err(BridgeError::Destroyed);
        }

        let pending = self.directory.prepare(url, options).map_err(|e| {
            log::warn!("[socketio] initialize({url}) failed: {e}");
            e
        })?;

        // Teardown may have started while the factory ran; the registry's
        // closed state is checked again under its lock.
        let init = self.registry.install(&self.directory, pending).map_err(|e| {
            log::debug!("[socketio] initialize({url}) refused: {e}");
            e
        })?;

        if let Some(old) = &init.replaced {
            old.disconnect();
        }

        log::info!("[socketio] Initialized {url} on {}", init.key);
        Ok(init.key)
    }

    /// Open the connection under `path`.
    pub fn connect(&self, path: Option<&str>) {
        let key = path_key(path);
        if let Some(socket) = self.resolve(key) {
            self.directory.mark_touched(key);
            if !socket.connected() {
                socket.connect();
            }
        }
    }

    /// Close the connection under `path`.
    pub fn disconnect(&self, path: Option<&str>) {
        if let Some(socket) = self.resolve(path_key(path)) {
            if socket.connected() {
                socket.disconnect();
            }
        }
    }

    /// Send `event` with a normalized payload.
    pub fn emit(&self, path: Option<&str>, event: &str, payload: &TaggedPayload) {
        if let Some(socket) = self.resolve(path_key(path)) {
            socket.emit(event, normalize_outbound(payload));
        }
    }

    /// Register a persistent listener; returns `(event_name, unique_id)`.
    ///
    /// The ids are returned even when `path` is not initialized yet; the
    /// binding is attached once a connection appears under that key.
    pub fn on(&self, path: Option<&str>, event: &str) -> (String, String) {
        self.listen(path_key(path), event, false)
    }

    /// Register a single-shot listener; returns `(event_name, unique_id)`.
    pub fn once(&self, path: Option<&str>, event: &str) -> (String, String) {
        self.listen(path_key(path), event, true)
    }

    /// [`Bridge::on`] reporting `(event_name, unique_id)` through `callback`.
    pub fn on_with<F>(&self, path: Option<&str>, event: &str, callback: F)
    where
        F: FnOnce(&str, &str),
    {
        let (event_name, unique_id) = self.on(path, event);
        callback(&event_name, &unique_id);
    }

    /// [`Bridge::once`] reporting `(event_name, unique_id)` through `callback`.
    pub fn once_with<F>(&self, path: Option<&str>, event: &str, callback: F)
    where
        F: FnOnce(&str, &str),
    {
        let (event_name, unique_id) = self.once(path, event);
        callback(&event_name, &unique_id);
    }

    fn listen(&self, key: &str, event: &str, once: bool) -> (String, String) {
        if self.is_destroyed() {
            // Stale handle: `off` with it is a no-op.
            log::debug!("[socketio] Listener for '{event}' requested after destroy");
            return (event.to_string(), uuid::Uuid::new_v4().to_string());
        }

        match self
            .registry
            .register_and_attach(&self.directory, key, event, once)
        {
            Some(binding) => (event.to_string(), binding.unique_id().to_string()),
            None => {
                log::debug!("[socketio] Listener for '{event}' refused during teardown");
                (event.to_string(), uuid::Uuid::new_v4().to_string())
            }
        }
    }

    /// Detach and unregister the binding `unique_id` for `event`.
    ///
    /// Unknown ids and mismatched event names are silent no-ops.
    pub fn off(&self, path: Option<&str>, event: &str, unique_id: &str) {
        let Some(binding) = self
            .registry
            .take_and_detach(&self.directory, event, unique_id)
        else {
            log::debug!("[socketio] off('{event}', {unique_id}): no such listener");
            return;
        };

        let key = path_key(path);
        if key != binding.path() {
            log::debug!(
                "[socketio] off({unique_id}) called with {key}, listener belongs to {}",
                binding.path()
            );
        }
    }

    /// Whether the connection under `path` is open (async form).
    pub async fn connected(&self, path: Option<&str>) -> bool {
        tokio::task::yield_now().await;
        self.connected_sync(path)
    }

    /// Whether the connection under `path` is open.
    ///
    /// Blocks the caller only for an in-memory read; prefer the async form
    /// on hot paths.
    pub fn connected_sync(&self, path: Option<&str>) -> bool {
        self.resolve(path_key(path))
            .is_some_and(|socket| socket.connected())
    }

    /// Session id of the connection under `path` (async form).
    pub async fn get_id(&self, path: Option<&str>) -> Option<String> {
        tokio::task::yield_now().await;
        self.get_id_sync(path)
    }

    /// Session id of the connection under `path`, if connected.
    pub fn get_id_sync(&self, path: Option<&str>) -> Option<String> {
        self.resolve(path_key(path)).and_then(|socket| socket.id())
    }

    /// Merge `options` into the stored configuration; `callback` receives `None`.
    pub fn update_options<F>(&self, options: &SocketOptions, callback: F)
    where
        F: FnOnce(Option<BridgeError>),
    {
        self.update_options_sync(options);
        callback(None);
    }

    /// Merge `options` into the stored configuration.
    pub fn update_options_sync(&self, options: &SocketOptions) {
        self.directory.update_options(options);
    }

    /// Lifecycle state of the connection under `path`.
    pub fn state(&self, path: Option<&str>) -> ConnectionState {
        if self.is_destroyed() {
            return ConnectionState::Destroyed;
        }
        let key = path_key(path);
        match self.directory.resolve(key) {
            None => ConnectionState::Uninitialized,
            Some(socket) if socket.connected() => ConnectionState::Connected,
            Some(_) if self.directory.is_touched(key) => ConnectionState::Disconnected,
            Some(_) => ConnectionState::Initialized,
        }
    }

    /// Number of active listener bindings.
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of stored connections.
    pub fn connection_count(&self) -> usize {
        self.directory.len()
    }

    /// Current base options that the next `initialize` merges over.
    pub fn base_options(&self) -> SocketOptions {
        self.directory.base_options()
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Whether [`Bridge::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Tear down: detach and drop every binding, then release connections.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Closing the registry first means no install can insert after the
        // directory is drained.
        let cleared = self.registry.clear_all(&self.directory);
        let released = self.directory.clear();
        for socket in &released {
            socket.disconnect();
        }
        log::info!(
            "[socketio] Bridge destroyed ({cleared} listener(s), {} connection(s))",
            released.len()
        );
    }

    fn resolve(&self, key: &str) -> Option<Arc<dyn SocketClient>> {
        if self.is_destroyed() {
            return None;
        }
        let socket = self.directory.resolve(key);
        if socket.is_none() {
            log::debug!("[socketio] No connection for {key}");
        }
        socket
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{LoopbackFactory, LoopbackSocket, NativeArg};
    use serde_json::json;

    fn bridge() -> (Bridge, FanInReceiver, Arc<LoopbackFactory>) {
        let factory = Arc::new(LoopbackFactory::new());
        let (bridge, rx) = Bridge::new(Arc::clone(&factory) as Arc<dyn SocketFactory>);
        (bridge, rx, factory)
    }

    fn initialized() -> (Bridge, FanInReceiver, Arc<LoopbackSocket>) {
        let (bridge, rx, factory) = bridge();
        bridge
            .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
            .unwrap();
        let socket = factory.last().unwrap();
        (bridge, rx, socket)
    }

    #[test]
    fn test_initialize_callback_runs_once_with_none() {
        let (bridge, _rx, _factory) = bridge();
        let mut calls = Vec::new();
        bridge.initialize("http://127.0.0.1:3000", &SocketOptions::default(), |err| {
            calls.push(err);
        });
        assert_eq!(calls, vec![None]);
        assert_eq!(bridge.state(None), ConnectionState::Initialized);
    }

    #[test]
    fn test_initialize_bad_uri_reports_configuration_error() {
        let (bridge, _rx, _factory) = bridge();
        let mut result = None;
        bridge.initialize("not a uri", &SocketOptions::default(), |err| result = err);

        assert!(matches!(result, Some(BridgeError::Configuration(_))));
        assert_eq!(bridge.connection_count(), 0);
        assert_eq!(bridge.state(None), ConnectionState::Uninitialized);
    }

    #[test]
    fn test_state_machine() {
        let (bridge, _rx, _socket) = initialized();
        assert_eq!(bridge.state(None), ConnectionState::Initialized);

        bridge.connect(None);
        bridge.connect(None);
        assert_eq!(bridge.state(None), ConnectionState::Connected);
        assert!(bridge.connected_sync(None));
        assert!(bridge.get_id_sync(None).is_some());

        bridge.disconnect(None);
        bridge.disconnect(None);
        assert_eq!(bridge.state(None), ConnectionState::Disconnected);
        assert!(bridge.get_id_sync(None).is_none());

        bridge.destroy();
        assert_eq!(bridge.state(None), ConnectionState::Destroyed);
    }

    #[test]
    fn test_operations_on_unknown_path_are_noops() {
        let (bridge, _rx, _socket) = initialized();
        bridge.connect(Some("/missing"));
        bridge.disconnect(Some("/missing"));
        bridge.emit(Some("/missing"), "x", &TaggedPayload::Integer(1));
        bridge.off(Some("/missing"), "x", "nope");

        assert!(!bridge.connected_sync(Some("/missing")));
        assert!(bridge.get_id_sync(Some("/missing")).is_none());
    }

    #[test]
    fn test_on_delivers_to_fan_in() {
        let (bridge, mut rx, socket) = initialized();
        let (event, id) = bridge.on(None, "welcome");
        assert_eq!(event, "welcome");

        socket.fire("welcome", &[NativeArg::Json(json!({ "count": 3, "tags": ["a", "b"] }))]);

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.unique_id, id);
        assert_eq!(msg.data.to_json(), json!({ "count": 3, "tags": ["a", "b"] }));
    }

    #[test]
    fn test_callback_forms_report_ids() {
        let (bridge, _rx, _socket) = initialized();
        let mut seen = Vec::new();
        bridge.on_with(None, "welcome", |event, id| seen.push((event.to_string(), id.to_string())));
        bridge.once_with(None, "ready", |event, id| seen.push((event.to_string(), id.to_string())));

        assert_eq!(seen[0].0, "welcome");
        assert_eq!(seen[1].0, "ready");
        assert_eq!(bridge.registry().ids(), vec![seen[0].1.clone(), seen[1].1.clone()]);
    }

    #[test]
    fn test_once_fires_single_time() {
        let (bridge, mut rx, socket) = initialized();
        bridge.once(None, "ready");

        socket.fire("ready", &[]);
        socket.fire("ready", &[]);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_off_detaches_and_unregisters() {
        let (bridge, _rx, socket) = initialized();
        let (_, id) = bridge.on(None, "welcome");
        assert_eq!(socket.listener_count("welcome"), 1);

        bridge.off(None, "other", &id);
        assert_eq!(bridge.listener_count(), 1);

        bridge.off(None, "welcome", &id);
        assert_eq!(bridge.listener_count(), 0);
        assert_eq!(socket.listener_count("welcome"), 0);

        bridge.off(None, "welcome", &id);
        assert_eq!(bridge.listener_count(), 0);
    }

    #[test]
    fn test_listener_registered_before_initialize_is_attached_later() {
        let (bridge, mut rx, factory) = bridge();
        let (_, id) = bridge.on(Some("/late"), "hello");

        let opts = SocketOptions {
            path: Some("/late".to_string()),
            ..SocketOptions::default()
        };
        bridge.try_initialize("ws://localhost:9000", &opts).unwrap();
        factory.last().unwrap().fire("hello", &[NativeArg::Json(json!(1))]);

        assert_eq!(rx.try_recv().unwrap().unique_id, id);
    }

    #[test]
    fn test_emit_normalizes_integral_floats() {
        let (bridge, _rx, socket) = initialized();
        bridge.emit(None, "send_number", &TaggedPayload::Float(124.0));
        bridge.emit(None, "send_number", &TaggedPayload::Float(124.25));

        let emitted = socket.emitted();
        assert!(emitted[0].1.is_i64());
        assert_eq!(emitted[0].1, json!(124));
        assert_eq!(emitted[1].1, json!(124.25));
    }

    #[test]
    fn test_reinitialize_moves_listeners_off_old_socket() {
        let (bridge, mut rx, factory) = bridge();
        bridge
            .try_initialize("http://127.0.0.1:3000", &SocketOptions::default())
            .unwrap();
        let old = factory.last().unwrap();
        let (_, id) = bridge.on(None, "welcome");

        bridge
            .try_initialize("http://127.0.0.1:4000", &SocketOptions::default())
            .unwrap();
        let new = factory.last().unwrap();

        assert_eq!(old.total_listener_count(), 0);
        assert_eq!(new.listener_count("welcome"), 1);

        new.fire("welcome", &[]);
        assert_eq!(rx.try_recv().unwrap().unique_id, id);
    }

    #[test]
    fn test_destroy_detaches_everything_and_is_idempotent() {
        let (bridge, mut rx, socket) = initialized();
        bridge.on(None, "welcome");
        bridge.on(None, "welcome");

        bridge.destroy();
        bridge.destroy();

        assert_eq!(socket.fire("welcome", &[]), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(bridge.listener_count(), 0);
        assert_eq!(bridge.connection_count(), 0);
    }

    #[test]
    fn test_operations_after_destroy() {
        let (bridge, _rx, _socket) = initialized();
        bridge.destroy();

        let (_, id) = bridge.on(None, "late");
        assert_eq!(bridge.listener_count(), 0);
        bridge.off(None, "late", &id);

        let mut result = None;
        bridge.initialize("http://127.0.0.1:3000", &SocketOptions::default(), |e| result = e);
        assert_eq!(result, Some(BridgeError::Destroyed));
    }

    #[test]
    fn test_update_options_callback_gets_none() {
        let (bridge, _rx, _factory) = bridge();
        let mut called = false;
        bridge.update_options(
            &SocketOptions {
                timeout: Some(10),
                ..SocketOptions::default()
            },
            |err| {
                assert!(err.is_none());
                called = true;
            },
        );
        assert!(called);
        assert_eq!(bridge.base_options().timeout, Some(10));
    }

    #[tokio::test]
    async fn test_async_queries() {
        let (bridge, _rx, _socket) = initialized();
        assert!(!bridge.connected(None).await);
        bridge.connect(None);
        assert!(bridge.connected(None).await);
        assert_eq!(bridge.get_id(None).await, bridge.get_id_sync(None));
    }
}
