//! Lua runtime management.
//!
//! Provides the `LuaRuntime` struct which owns the Lua interpreter state and
//! the [`Bridge`] it talks to. Handles script loading, event polling and
//! error handling based on environment configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use mlua::Lua;

use super::primitives;
use super::primitives::socketio::{clear_proxy, poll_events};
use super::primitives::ConsumerProxy;
use crate::bridge::Bridge;
use crate::socket::SocketFactory;

/// Environment variable overriding the script base path.
pub const ENV_LUA_PATH: &str = "SOCKETIO_BRIDGE_LUA_PATH";

/// Environment variable enabling strict mode when set to "1".
pub const ENV_LUA_STRICT: &str = "SOCKETIO_BRIDGE_LUA_STRICT";

/// Lua scripting runtime with a `socketio` global.
///
/// The Lua state is not `Send`; drive the runtime from one thread and call
/// [`LuaRuntime::poll`] periodically to deliver socket events to scripts.
///
/// # Environment Variables
///
/// - `SOCKETIO_BRIDGE_LUA_PATH` - Base path for relative script loads (default: current directory)
/// - `SOCKETIO_BRIDGE_LUA_STRICT` - If "1", Lua errors propagate instead of being logged
///
/// # Example
///
/// ```ignore
/// let runtime = LuaRuntime::new(Arc::new(LoopbackFactory::new()))?;
/// runtime.load_file(Path::new("client.lua"))?;
/// loop {
///     runtime.poll();
/// }
/// ```
pub struct LuaRuntime {
    lua: Lua,
    bridge: Arc<Bridge>,
    proxy: ConsumerProxy,
    /// Base path for loading Lua scripts.
    base_path: PathBuf,
    /// Whether Lua errors propagate to the caller.
    strict: bool,
}

impl std::fmt::Debug for LuaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaRuntime")
            .field("base_path", &self.base_path)
            .field("strict", &self.strict)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl LuaRuntime {
    /// Create a runtime whose sockets are built by `factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if primitive registration or `package.path` setup fails.
    pub fn new(factory: Arc<dyn SocketFactory>) -> Result<Self> {
        let lua = Lua::new();
        let base_path = Self::resolve_base_path();
        let strict = std::env::var(ENV_LUA_STRICT)
            .map(|v| v == "1")
            .unwrap_or(false);

        let (bridge, receiver) = Bridge::new(factory);
        let bridge = Arc::new(bridge);
        let proxy = primitives::new_consumer_proxy(receiver);

        primitives::register_all(&lua).context("Failed to register Lua primitives")?;
        primitives::register_socketio(&lua, Arc::clone(&bridge), Arc::clone(&proxy))
            .context("Failed to register socketio primitives")?;

        Self::setup_package_path(&lua, &base_path)?;

        log::debug!(
            "Lua runtime created (base_path={}, strict={})",
            base_path.display(),
            strict
        );

        Ok(Self {
            lua,
            bridge,
            proxy,
            base_path,
            strict,
        })
    }

    /// Let `require("x")` find `{base_path}/x.lua` and `{base_path}/x/init.lua`.
    fn setup_package_path(lua: &Lua, base_path: &Path) -> Result<()> {
        let package: mlua::Table = lua
            .globals()
            .get("package")
            .map_err(|e| anyhow!("Failed to get package table: {e}"))?;

        let current_path: String = package
            .get("path")
            .map_err(|e| anyhow!("Failed to get package.path: {e}"))?;

        let new_path = format!(
            "{path}/?.lua;{path}/?/init.lua;{current}",
            path = base_path.display(),
            current = current_path
        );

        package
            .set("path", new_path)
            .map_err(|e| anyhow!("Failed to set package.path: {e}"))?;

        Ok(())
    }

    fn resolve_base_path() -> PathBuf {
        std::env::var(ENV_LUA_PATH).map_or_else(|_| PathBuf::from("."), PathBuf::from)
    }

    /// Base path for relative script loads.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Whether strict mode is enabled.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Override strict mode.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// The underlying Lua state.
    #[must_use]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// The bridge backing the `socketio` global.
    #[must_use]
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Number of listeners mirrored on the Lua side.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.proxy.lock().expect("ConsumerProxy mutex poisoned").len()
    }

    /// Load and execute a Lua file relative to the base path.
    ///
    /// # Errors
    ///
    /// In strict mode, read, syntax and runtime errors propagate. Otherwise
    /// they are logged and `Ok(())` is returned.
    pub fn load_file(&self, relative_path: &Path) -> Result<()> {
        self.load_file_absolute(&self.base_path.join(relative_path))
    }

    /// Load and execute a Lua file from an absolute path.
    ///
    /// # Errors
    ///
    /// Same as [`LuaRuntime::load_file`].
    pub fn load_file_absolute(&self, path: &Path) -> Result<()> {
        let result = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read Lua file: {}", path.display()))
            .and_then(|source| self.exec(&path.to_string_lossy(), &source));
        self.handle_error(&path.display().to_string(), result)
    }

    /// Load and execute Lua code from a string.
    ///
    /// # Errors
    ///
    /// Same as [`LuaRuntime::load_file`].
    pub fn load_string(&self, name: &str, source: &str) -> Result<()> {
        let result = self.exec(name, source);
        self.handle_error(name, result)
    }

    fn exec(&self, name: &str, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|e| anyhow!("Failed to execute Lua {name}: {e}"))?;
        log::debug!("Loaded Lua: {name}");
        Ok(())
    }

    fn handle_error(&self, name: &str, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if !self.strict => {
                log::warn!("Lua error ({name}): {e:#}");
                Ok(())
            }
            other => other,
        }
    }

    /// Deliver pending socket events to Lua callbacks.
    ///
    /// Returns the number of callbacks invoked.
    pub fn poll(&self) -> usize {
        poll_events(&self.lua, &self.proxy, &self.bridge)
    }

    /// Tear down the bridge and release every Lua callback. Idempotent.
    pub fn shutdown(&self) {
        self.bridge.destroy();
        let released = clear_proxy(&self.lua, &self.proxy);
        if released > 0 {
            log::debug!("Released {released} Lua listener(s)");
        }
    }
}

impl Drop for LuaRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
