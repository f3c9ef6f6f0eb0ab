//! Cross-boundary event bridge for Socket.IO-style clients.
//!
//! Native socket clients live on one side of the boundary; a consumer (here,
//! Lua scripts) lives on the other. The bridge lets the consumer create
//! connections, register and remove listeners, emit events and query
//! connection state, while every listener payload crosses back through a
//! single fan-in channel tagged by listener id.
//!
//! - [`bridge`] - Payload normalizer, listener registry, connection directory
//!   and the [`Bridge`] operations built on them
//! - [`socket`] - The native client traits and an in-process loopback client
//! - [`lua`] - The Lua runtime and its `socketio` consumer proxy
//! - [`error`] - Errors reported across the boundary

pub mod bridge;
pub mod error;
pub mod lua;
pub mod socket;

pub use bridge::{
    BoundaryMessage, Bridge, ConnectionState, SocketOptions, TaggedPayload, FAN_IN_CHANNEL,
};
pub use error::BridgeError;
pub use lua::LuaRuntime;
pub use socket::{LoopbackFactory, LoopbackSocket, SocketClient, SocketFactory};
