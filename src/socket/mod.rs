//! Native socket client abstraction.
//!
//! The bridge never speaks a real-time wire protocol itself. It drives any
//! client that implements [`SocketClient`], an event-emitter shaped surface
//! (`on` / `once` / `off` / `emit`) plus connection state. Clients are built
//! by a [`SocketFactory`] when the consumer calls `initialize`.
//!
//! # Listener identity
//!
//! Listeners are trait objects carrying their own string id. `off` detaches
//! by `(event, listener_id)`, so teardown can enumerate bindings by value
//! instead of relying on closure identity.
//!
//! # Threading
//!
//! Clients invoke listeners on their own event thread(s). Implementations
//! must not hold internal locks while calling [`EventListener::on_event`],
//! since a listener may call back into the client (e.g. `off` itself).

pub mod loopback;

use std::sync::Arc;

use anyhow::Result;
use url::Url;

use crate::bridge::options::SocketOptions;

pub use loopback::{LoopbackFactory, LoopbackSocket};

/// A single argument delivered with a native socket event.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeArg {
    /// Decoded JSON-like data (scalars, objects, arrays, null).
    Json(serde_json::Value),
    /// A transport or protocol failure raised by the client.
    TransportError {
        /// Human-readable description.
        message: String,
        /// Structured detail; never forwarded across the boundary.
        detail: Option<serde_json::Value>,
    },
    /// Raw binary attachment. Not representable across the boundary.
    Binary(Vec<u8>),
}

impl From<serde_json::Value> for NativeArg {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Receiver of native socket events.
pub trait EventListener: Send + Sync {
    /// Stable identifier used to detach this listener.
    fn listener_id(&self) -> &str;

    /// Called by the client each time the subscribed event fires.
    fn on_event(&self, args: &[NativeArg]);
}

/// Shared handle to a listener, as stored by socket clients.
pub type SharedListener = Arc<dyn EventListener>;

/// Event-emitter surface of a Socket.IO-style client.
pub trait SocketClient: Send + Sync + std::fmt::Debug {
    /// Open the connection. Calling on a connected client is a no-op.
    fn connect(&self);

    /// Close the connection. Calling on a disconnected client is a no-op.
    fn disconnect(&self);

    /// Whether the client currently holds an open connection.
    fn connected(&self) -> bool;

    /// Session id assigned by the server, if connected.
    fn id(&self) -> Option<String>;

    /// Send an event with an optional payload (`Null` means no payload).
    fn emit(&self, event: &str, data: serde_json::Value);

    /// Attach a persistent listener.
    fn on(&self, event: &str, listener: SharedListener);

    /// Attach a listener that is removed after its first invocation.
    fn once(&self, event: &str, listener: SharedListener);

    /// Detach the listener with `listener_id` from `event`.
    ///
    /// Returns `true` if a listener was removed.
    fn off(&self, event: &str, listener_id: &str) -> bool;
}

/// Builds socket clients for validated endpoints.
pub trait SocketFactory: Send + Sync + std::fmt::Debug {
    /// Create a (not yet connected) client for `url` with the effective options.
    fn create(&self, url: &Url, options: &SocketOptions) -> Result<Arc<dyn SocketClient>>;
}
