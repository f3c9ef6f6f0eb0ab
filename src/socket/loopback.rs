//! In-process socket client.
//!
//! `LoopbackSocket` implements [`SocketClient`] without any network I/O. It
//! keeps an ordered listener table, tracks connection state, and records
//! every emit. With echo enabled, emits are delivered straight back to the
//! socket's own listeners, which makes it usable as a local demo server.
//!
//! Tests drive inbound traffic with [`LoopbackSocket::fire`], which behaves
//! like the client's event thread: matching listeners are snapshotted under
//! the lock and invoked after it is released.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use url::Url;

use super::{NativeArg, SharedListener, SocketClient, SocketFactory};
use crate::bridge::options::SocketOptions;

/// Event fired after a successful `connect`.
pub const EVENT_CONNECT: &str = "connect";

/// Event fired after `disconnect`.
pub const EVENT_DISCONNECT: &str = "disconnect";

struct ListenerSlot {
    event: String,
    listener: SharedListener,
    once: bool,
}

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    session_id: Option<String>,
    listeners: Vec<ListenerSlot>,
    emitted: Vec<(String, serde_json::Value)>,
}

/// A socket client that never leaves the process.
pub struct LoopbackSocket {
    url: Url,
    options: SocketOptions,
    echo: bool,
    state: Mutex<LoopbackState>,
}

impl std::fmt::Debug for LoopbackSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (connected, listeners) = self
            .state
            .lock()
            .map(|s| (s.connected, s.listeners.len()))
            .unwrap_or_default();
        f.debug_struct("LoopbackSocket")
            .field("url", &self.url.as_str())
            .field("path", &self.options.path())
            .field("echo", &self.echo)
            .field("connected", &connected)
            .field("listeners", &listeners)
            .finish()
    }
}

impl LoopbackSocket {
    /// Create a disconnected loopback socket.
    #[must_use]
    pub fn new(url: Url, options: SocketOptions, echo: bool) -> Self {
        Self {
            url,
            options,
            echo,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    /// Endpoint this socket was built for.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Effective options used at construction.
    #[must_use]
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Deliver a native event to every listener attached for `event`.
    ///
    /// Single-shot listeners are removed in the same critical section that
    /// selects them, so concurrent fires never deliver a `once` twice.
    /// Returns the number of listeners invoked.
    pub fn fire(&self, event: &str, args: &[NativeArg]) -> usize {
        let targets: Vec<SharedListener> = {
            let mut state = self.state.lock().expect("LoopbackSocket mutex poisoned");
            let targets = state
                .listeners
                .iter()
                .filter(|slot| slot.event == event)
                .map(|slot| Arc::clone(&slot.listener))
                .collect();
            state
                .listeners
                .retain(|slot| !(slot.once && slot.event == event));
            targets
        };
        // Lock released: listeners may call back into this socket.

        for listener in &targets {
            listener.on_event(args);
        }
        targets.len()
    }

    /// Number of listeners currently attached for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.state
            .lock()
            .expect("LoopbackSocket mutex poisoned")
            .listeners
            .iter()
            .filter(|slot| slot.event == event)
            .count()
    }

    /// Number of listeners attached across all events.
    #[must_use]
    pub fn total_listener_count(&self) -> usize {
        self.state
            .lock()
            .expect("LoopbackSocket mutex poisoned")
            .listeners
            .len()
    }

    /// Every `(event, data)` pair emitted so far, oldest first.
    #[must_use]
    pub fn emitted(&self) -> Vec<(String, serde_json::Value)> {
        self.state
            .lock()
            .expect("LoopbackSocket mutex poisoned")
            .emitted
            .clone()
    }

    fn attach(&self, event: &str, listener: SharedListener, once: bool) {
        let mut state = self.state.lock().expect("LoopbackSocket mutex poisoned");
        state.listeners.push(ListenerSlot {
            event: event.to_string(),
            listener,
            once,
        });
    }
}

impl SocketClient for LoopbackSocket {
    fn connect(&self) {
        {
            let mut state = self.state.lock().expect("LoopbackSocket mutex poisoned");
            if state.connected {
                return;
            }
            state.connected = true;
            state.session_id = Some(uuid::Uuid::new_v4().simple().to_string());
        }
        log::debug!("[loopback] {} connected", self.url);
        self.fire(EVENT_CONNECT, &[]);
    }

    fn disconnect(&self) {
        {
            let mut state = self.state.lock().expect("LoopbackSocket mutex poisoned");
            if !state.connected {
                return;
            }
            state.connected = false;
            state.session_id = None;
        }
        log::debug!("[loopback] {} disconnected", self.url);
        self.fire(
            EVENT_DISCONNECT,
            &[NativeArg::Json(serde_json::Value::String(
                "io client disconnect".to_string(),
            ))],
        );
    }

    fn connected(&self) -> bool {
        self.state
            .lock()
            .expect("LoopbackSocket mutex poisoned")
            .connected
    }

    fn id(&self) -> Option<String> {
        self.state
            .lock()
            .expect("LoopbackSocket mutex poisoned")
            .session_id
            .clone()
    }

    fn emit(&self, event: &str, data: serde_json::Value) {
        let deliver = {
            let mut state = self.state.lock().expect("LoopbackSocket mutex poisoned");
            state.emitted.push((event.to_string(), data.clone()));
            self.echo && state.connected
        };

        if deliver {
            let args = if data.is_null() {
                Vec::new()
            } else {
                vec![NativeArg::Json(data)]
            };
            self.fire(event, &args);
        }
    }

    fn on(&self, event: &str, listener: SharedListener) {
        self.attach(event, listener, false);
    }

    fn once(&self, event: &str, listener: SharedListener) {
        self.attach(event, listener, true);
    }

    fn off(&self, event: &str, listener_id: &str) -> bool {
        let mut state = self.state.lock().expect("LoopbackSocket mutex poisoned");
        let position = state
            .listeners
            .iter()
            .position(|slot| slot.event == event && slot.listener.listener_id() == listener_id);
        match position {
            Some(idx) => {
                state.listeners.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Factory producing [`LoopbackSocket`]s.
///
/// Keeps a handle to every socket it built so callers (tests, the demo CLI)
/// can inject inbound events.
#[derive(Debug, Default)]
pub struct LoopbackFactory {
    echo: bool,
    created: Mutex<Vec<Arc<LoopbackSocket>>>,
}

impl LoopbackFactory {
    /// Factory whose sockets only record emits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose sockets deliver emits back to their own listeners.
    #[must_use]
    pub fn echoing() -> Self {
        Self {
            echo: true,
            created: Mutex::new(Vec::new()),
        }
    }

    /// All sockets created so far, oldest first.
    #[must_use]
    pub fn sockets(&self) -> Vec<Arc<LoopbackSocket>> {
        self.created
            .lock()
            .expect("LoopbackFactory mutex poisoned")
            .clone()
    }

    /// The most recently created socket.
    #[must_use]
    pub fn last(&self) -> Option<Arc<LoopbackSocket>> {
        self.created
            .lock()
            .expect("LoopbackFactory mutex poisoned")
            .last()
            .cloned()
    }
}

impl SocketFactory for LoopbackFactory {
    fn create(&self, url: &Url, options: &SocketOptions) -> Result<Arc<dyn SocketClient>> {
        let socket = Arc::new(LoopbackSocket::new(url.clone(), options.clone(), self.echo));
        self.created
            .lock()
            .expect("LoopbackFactory mutex poisoned")
            .push(Arc::clone(&socket));
        Ok(socket)
    }
}
