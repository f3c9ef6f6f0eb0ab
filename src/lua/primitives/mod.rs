//! Lua primitive functions exposed to scripts.
//!
//! # Available Primitives
//!
//! - `log` - Logging functions (info, warn, error, debug)
//! - `json` - JSON encode/decode with boundary number typing
//! - `socketio` - Socket.IO-style client (connections, listeners, emit)
//!
//! # Adding New Primitives
//!
//! 1. Create a new module (e.g., `foo.rs`)
//! 2. Implement a `register(lua: &Lua) -> Result<()>` function
//! 3. Add `pub mod foo;` here
//! 4. Call `foo::register(lua)?;` in `register_all`

pub mod json;
pub mod log;
pub mod payload;
pub mod socketio;

use std::sync::Arc;

use anyhow::Result;
use mlua::Lua;

use crate::bridge::Bridge;

pub use socketio::{new_consumer_proxy, ConsumerProxy, LuaSocket};

/// Register the stateless primitives with the Lua state.
///
/// # Errors
///
/// Returns an error if any primitive registration fails.
pub fn register_all(lua: &Lua) -> Result<()> {
    log::register(lua)?;
    json::register(lua)?;
    Ok(())
}

/// Register the `socketio` table backed by `bridge`.
///
/// # Errors
///
/// Returns an error if registration fails.
pub fn register_socketio(lua: &Lua, bridge: Arc<Bridge>, proxy: ConsumerProxy) -> Result<()> {
    socketio::register(lua, bridge, proxy)
}
