//! Lua scripting runtime: the consumer side of the bridge.
//!
//! # Architecture
//!
//! ```text
//! LuaRuntime
//!  ├── Lua state (mlua)
//!  ├── Arc<Bridge> ──► ConnectionDirectory / ListenerRegistry
//!  └── Primitives
//!       ├── log (info, warn, error, debug)
//!       ├── json (encode, decode)
//!       └── socketio (new, initialize, poll, Socket userdata)
//! ```
//!
//! # Configuration
//!
//! - `SOCKETIO_BRIDGE_LUA_PATH` - Base path for relative script loads
//! - `SOCKETIO_BRIDGE_LUA_STRICT` - If "1", propagate Lua errors instead of logging

pub mod primitives;
pub mod runtime;

pub use runtime::LuaRuntime;
