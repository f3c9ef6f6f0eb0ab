//! Socket.IO-style client primitive for Lua scripts.
//!
//! This is the consumer side of the bridge. It keeps a mirror of every
//! listener the script registered (`uniqueID` → callback) and demultiplexes
//! the single fan-in channel into those callbacks on [`poll_events`].
//!
//! # Usage in Lua
//!
//! ```lua
//! local sock, err = socketio.new("http://127.0.0.1:3000", {
//!     transports = { "websocket" },
//!     query = socketio.serialize_query({ token = "abc" }),
//! })
//! if not sock then
//!     log.error(err)
//!     return
//! end
//!
//! local function on_welcome(data)
//!     log.info("count=" .. data.count)
//! end
//!
//! sock:on("welcome", on_welcome)
//! sock:once("connect", function() sock:emit("hello", { name = "bot" }) end)
//! sock:connect()
//!
//! -- later
//! sock:off("welcome", on_welcome)
//! ```
//!
//! # Dispatch
//!
//! `socketio.poll()` runs in three phases, like the other callback-based
//! primitives: drain and look up callbacks under the proxy lock, release the
//! lock and call into Lua, then retire finished `once` listeners. Callbacks
//! may therefore call `on`/`off`/`emit` freely.
//!
//! Messages whose `uniqueID` is no longer mirrored (a listener removed while
//! its message was in flight) are dropped.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use mlua::prelude::*;

use super::payload::{lua_key, lua_to_payload, payload_to_lua};
use crate::bridge::{serialize_query, Bridge, FanInReceiver, SocketOptions, TaggedPayload};
use crate::error::BridgeError;

/// One listener registered from Lua.
#[derive(Debug)]
pub struct ProxyEntry {
    unique_id: String,
    event_name: String,
    path: String,
    once: bool,
    callback: LuaRegistryKey,
}

/// Mirror of Lua listeners plus the consumer end of the fan-in channel.
#[derive(Debug)]
pub struct ProxyState {
    entries: Vec<ProxyEntry>,
    receiver: FanInReceiver,
}

impl ProxyState {
    /// Number of mirrored listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no listeners are mirrored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `unique_id` is mirrored.
    #[must_use]
    pub fn contains(&self, unique_id: &str) -> bool {
        self.entries.iter().any(|e| e.unique_id == unique_id)
    }
}

/// Shared consumer proxy state.
pub type ConsumerProxy = Arc<Mutex<ProxyState>>;

/// Create a consumer proxy reading from `receiver`.
#[must_use]
pub fn new_consumer_proxy(receiver: FanInReceiver) -> ConsumerProxy {
    Arc::new(Mutex::new(ProxyState {
        entries: Vec::new(),
        receiver,
    }))
}

/// Handle to one connection key, as seen by Lua.
#[derive(Clone)]
pub struct LuaSocket {
    path: String,
    bridge: Arc<Bridge>,
    proxy: ConsumerProxy,
}

impl std::fmt::Debug for LuaSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaSocket")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LuaSocket {
    fn listen(&self, lua: &Lua, event: &str, callback: LuaFunction, once: bool) -> LuaResult<String> {
        let (event_name, unique_id) = if once {
            self.bridge.once(Some(&self.path), event)
        } else {
            self.bridge.on(Some(&self.path), event)
        };

        let key = lua.create_registry_value(callback)?;
        lock_proxy(&self.proxy).entries.push(ProxyEntry {
            unique_id: unique_id.clone(),
            event_name,
            path: self.path.clone(),
            once,
            callback: key,
        });
        Ok(unique_id)
    }

    fn unlisten(&self, lua: &Lua, event: &str, callback: &LuaFunction) -> LuaResult<bool> {
        let removed = {
            let mut state = lock_proxy(&self.proxy);
            let index = state.entries.iter().position(|e| {
                e.event_name == event
                    && e.path == self.path
                    && lua
                        .registry_value::<LuaFunction>(&e.callback)
                        .is_ok_and(|f| &f == callback)
            });
            index.map(|i| state.entries.remove(i))
        };

        let Some(entry) = removed else {
            log::debug!("[socketio] off('{event}'): callback not registered");
            return Ok(false);
        };

        self.bridge
            .off(Some(&entry.path), &entry.event_name, &entry.unique_id);
        lua.remove_registry_value(entry.callback)?;
        Ok(true)
    }
}

impl LuaUserData for LuaSocket {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("connect", |_, this, ()| {
            this.bridge.connect(Some(&this.path));
            Ok(())
        });

        methods.add_method("disconnect", |_, this, ()| {
            this.bridge.disconnect(Some(&this.path));
            Ok(())
        });

        // sock:emit(event, data?) - data may be any table, scalar, or nil.
        methods.add_method("emit", |_, this, (event, data): (String, LuaValue)| {
            this.bridge
                .emit(Some(&this.path), &event, &lua_to_payload(&data));
            Ok(())
        });

        methods.add_method("on", |lua, this, (event, callback): (String, LuaFunction)| {
            this.listen(lua, &event, callback, false)
        });

        methods.add_method("once", |lua, this, (event, callback): (String, LuaFunction)| {
            this.listen(lua, &event, callback, true)
        });

        // sock:off(event, fn) -> boolean
        //
        // Removes the first listener registered with this exact function.
        methods.add_method("off", |lua, this, (event, callback): (String, LuaFunction)| {
            this.unlisten(lua, &event, &callback)
        });

        methods.add_method("connected", |_, this, callback: Option<LuaFunction>| {
            let connected = this.bridge.connected_sync(Some(&this.path));
            if let Some(cb) = callback {
                cb.call::<()>(connected)?;
            }
            Ok(connected)
        });

        methods.add_method("connected_sync", |_, this, ()| {
            Ok(this.bridge.connected_sync(Some(&this.path)))
        });

        methods.add_method("get_id", |_, this, callback: Option<LuaFunction>| {
            let id = this.bridge.get_id_sync(Some(&this.path));
            if let Some(cb) = callback {
                cb.call::<()>(id.clone())?;
            }
            Ok(id)
        });

        methods.add_method("get_id_sync", |_, this, ()| {
            Ok(this.bridge.get_id_sync(Some(&this.path)))
        });

        // sock:update_options(opts) -> (true, nil) | (nil, err)
        methods.add_method("update_options", |_, this, opts: LuaValue| {
            Ok(match options_from_lua(&opts) {
                Ok(options) => {
                    this.bridge.update_options_sync(&options);
                    (Some(true), None)
                }
                Err(e) => (None, Some(format!("{e:#}"))),
            })
        });

        methods.add_method("path", |_, this, ()| Ok(this.path.clone()));

        methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
            Ok(format!("socketio.Socket({})", this.path))
        });
    }
}

/// Deliver pending fan-in messages to their Lua callbacks.
///
/// Returns the number of callbacks invoked. Callback errors are logged and
/// do not stop delivery of later messages.
pub fn poll_events(lua: &Lua, proxy: &ConsumerProxy, bridge: &Bridge) -> usize {
    struct Delivery {
        callback: LuaFunction,
        data: TaggedPayload,
        event_name: String,
        finished: Option<ProxyEntry>,
    }

    // Phase 1: drain the channel and resolve callbacks under the lock.
    let deliveries: Vec<Delivery> = {
        let mut state = lock_proxy(proxy);
        let mut deliveries = Vec::new();

        while let Ok(msg) = state.receiver.try_recv() {
            let Some(index) = state.entries.iter().position(|e| e.unique_id == msg.unique_id)
            else {
                log::debug!(
                    "[socketio] Dropping '{}' for unknown listener {}",
                    msg.event_name,
                    msg.unique_id
                );
                continue;
            };

            let callback = match lua.registry_value::<LuaFunction>(&state.entries[index].callback)
            {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("[socketio] Callback lookup failed for '{}': {e}", msg.event_name);
                    continue;
                }
            };

            let finished = state.entries[index]
                .once
                .then(|| state.entries.remove(index));
            deliveries.push(Delivery {
                callback,
                data: msg.data,
                event_name: msg.event_name,
                finished,
            });
        }

        deliveries
    };
    // Lock released: callbacks may call back into socketio.

    // Phase 2: invoke callbacks.
    let count = deliveries.len();
    let mut finished = Vec::new();
    for delivery in deliveries {
        let result = payload_to_lua(lua, &delivery.data)
            .and_then(|data| delivery.callback.call::<()>(data));
        if let Err(e) = result {
            log::warn!("[socketio] '{}' callback error: {e}", delivery.event_name);
        }
        finished.extend(delivery.finished);
    }

    // Phase 3: retire once-listeners on both sides.
    for entry in finished {
        bridge.off(Some(&entry.path), &entry.event_name, &entry.unique_id);
        if let Err(e) = lua.remove_registry_value(entry.callback) {
            log::debug!("[socketio] Failed to release once callback: {e}");
        }
    }

    count
}

/// Drop every mirrored listener and release its Lua callback.
pub fn clear_proxy(lua: &Lua, proxy: &ConsumerProxy) -> usize {
    let entries: Vec<ProxyEntry> = lock_proxy(proxy).entries.drain(..).collect();
    let count = entries.len();
    for entry in entries {
        if let Err(e) = lua.remove_registry_value(entry.callback) {
            log::debug!("[socketio] Failed to release callback {}: {e}", entry.unique_id);
        }
    }
    count
}

/// Register the global `socketio` table.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua, bridge: Arc<Bridge>, proxy: ConsumerProxy) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create socketio table: {e}"))?;

    // socketio.new(url, opts?) -> (sock, nil) | (nil, err)
    let b = Arc::clone(&bridge);
    let p = Arc::clone(&proxy);
    let new_fn = lua
        .create_function(move |_, (url, opts): (String, LuaValue)| {
            Ok(match open(&b, &p, &url, &opts) {
                Ok(sock) => (Some(sock), None),
                Err(e) => (None, Some(e)),
            })
        })
        .map_err(|e| anyhow!("Failed to create socketio.new function: {e}"))?;
    table
        .set("new", new_fn)
        .map_err(|e| anyhow!("Failed to set socketio.new: {e}"))?;

    // socketio.initialize(url, opts?, cb?) -> sock | nil
    //
    // `cb(err)` runs exactly once, with nil on success.
    let b = Arc::clone(&bridge);
    let p = Arc::clone(&proxy);
    let initialize_fn = lua
        .create_function(
            move |_, (url, opts, callback): (String, LuaValue, Option<LuaFunction>)| {
                let (opts, callback) = match (opts, callback) {
                    (LuaValue::Function(f), None) => (LuaValue::Nil, Some(f)),
                    (opts, callback) => (opts, callback),
                };
                let (sock, err) = match open(&b, &p, &url, &opts) {
                    Ok(sock) => (Some(sock), None),
                    Err(e) => (None, Some(e)),
                };
                if let Some(cb) = callback {
                    cb.call::<()>(err)?;
                }
                Ok(sock)
            },
        )
        .map_err(|e| anyhow!("Failed to create socketio.initialize function: {e}"))?;
    table
        .set("initialize", initialize_fn)
        .map_err(|e| anyhow!("Failed to set socketio.initialize: {e}"))?;

    let serialize_fn = lua
        .create_function(|_, params: LuaTable| {
            let pairs: Vec<(String, String)> = params
                .pairs::<LuaValue, LuaValue>()
                .filter_map(|pair| {
                    let (k, v) = pair.ok()?;
                    Some((lua_key(&k)?, query_value(&v)?))
                })
                .collect();
            Ok(serialize_query(pairs))
        })
        .map_err(|e| anyhow!("Failed to create socketio.serialize_query function: {e}"))?;
    table
        .set("serialize_query", serialize_fn)
        .map_err(|e| anyhow!("Failed to set socketio.serialize_query: {e}"))?;

    // socketio.update_options(opts, cb?) -> (true, nil) | (nil, err)
    let b = Arc::clone(&bridge);
    let update_fn = lua
        .create_function(move |_, (opts, callback): (LuaValue, Option<LuaFunction>)| {
            let outcome = match options_from_lua(&opts) {
                Ok(options) => {
                    let mut err = None;
                    b.update_options(&options, |e| err = e.map(|e| error_string(&e)));
                    err
                }
                Err(e) => Some(format!("{e:#}")),
            };
            if let Some(cb) = callback {
                cb.call::<()>(outcome.clone())?;
            }
            Ok(match outcome {
                None => (Some(true), None),
                Some(e) => (None, Some(e)),
            })
        })
        .map_err(|e| anyhow!("Failed to create socketio.update_options function: {e}"))?;
    table
        .set("update_options", update_fn)
        .map_err(|e| anyhow!("Failed to set socketio.update_options: {e}"))?;

    let b = Arc::clone(&bridge);
    let update_sync_fn = lua
        .create_function(move |_, opts: LuaValue| {
            Ok(match options_from_lua(&opts) {
                Ok(options) => {
                    b.update_options_sync(&options);
                    (Some(true), None)
                }
                Err(e) => (None, Some(format!("{e:#}"))),
            })
        })
        .map_err(|e| anyhow!("Failed to create socketio.update_options_sync function: {e}"))?;
    table
        .set("update_options_sync", update_sync_fn)
        .map_err(|e| anyhow!("Failed to set socketio.update_options_sync: {e}"))?;

    let b = Arc::clone(&bridge);
    let p = Arc::clone(&proxy);
    let poll_fn = lua
        .create_function(move |lua, ()| Ok(poll_events(lua, &p, &b)))
        .map_err(|e| anyhow!("Failed to create socketio.poll function: {e}"))?;
    table
        .set("poll", poll_fn)
        .map_err(|e| anyhow!("Failed to set socketio.poll: {e}"))?;

    let p = Arc::clone(&proxy);
    let count_fn = lua
        .create_function(move |_, ()| Ok(lock_proxy(&p).len()))
        .map_err(|e| anyhow!("Failed to create socketio.listener_count function: {e}"))?;
    table
        .set("listener_count", count_fn)
        .map_err(|e| anyhow!("Failed to set socketio.listener_count: {e}"))?;

    lua.globals()
        .set("socketio", table)
        .map_err(|e| anyhow!("Failed to register socketio table globally: {e}"))?;

    Ok(())
}

fn open(
    bridge: &Arc<Bridge>,
    proxy: &ConsumerProxy,
    url: &str,
    opts: &LuaValue,
) -> std::result::Result<LuaSocket, String> {
    let options = options_from_lua(opts).map_err(|e| format!("{e:#}"))?;
    let path = bridge
        .try_initialize(url, &options)
        .map_err(|e| error_string(&e))?;
    Ok(LuaSocket {
        path,
        bridge: Arc::clone(bridge),
        proxy: Arc::clone(proxy),
    })
}

fn options_from_lua(value: &LuaValue) -> Result<SocketOptions> {
    SocketOptions::from_json(lua_to_payload(value).to_json())
}

/// Query string form of a scalar Lua value; tables and functions are skipped.
fn query_value(value: &LuaValue) -> Option<String> {
    match value {
        LuaValue::String(s) => Some(s.to_string_lossy()),
        LuaValue::Integer(_) | LuaValue::Number(_) | LuaValue::Boolean(_) => {
            Some(lua_to_payload(value).to_json().to_string())
        }
        _ => None,
    }
}

/// Error text handed to Lua, prefixed with the error kind.
fn error_string(e: &BridgeError) -> String {
    format!("{}: {e}", e.kind())
}

fn lock_proxy(proxy: &ConsumerProxy) -> std::sync::MutexGuard<'_, ProxyState> {
    proxy.lock().expect("ConsumerProxy mutex poisoned")
}
