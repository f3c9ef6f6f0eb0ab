//! Socket instance directory: path key → live socket client.
//!
//! Connections are multiplexed by their `path` option. One set of base
//! options is kept here; `update_options` merges into it and the next
//! `initialize` layers its own per-call options on top. Path arguments on
//! the other bridge operations only select a key and never carry
//! configuration.
//!
//! The map is private and guarded by one mutex; callers only see
//! `initialize`, `resolve` and `update_options`. Insertion and teardown
//! that must stay in step with the listener registry are crate-private and
//! run under the registry lock (lock order: registry, then directory).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use url::Url;

use super::options::SocketOptions;
use crate::error::BridgeError;
use crate::socket::{SocketClient, SocketFactory};

/// URI schemes accepted as connection endpoints.
const ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

/// Result of a successful `initialize`.
#[derive(Debug)]
pub struct Initialized {
    /// Directory key the connection is stored under.
    pub key: String,
    /// The newly built client.
    pub socket: Arc<dyn SocketClient>,
    /// The client previously stored under `key`, if any.
    pub replaced: Option<Arc<dyn SocketClient>>,
}

/// A validated, freshly built client that is not yet stored.
#[derive(Debug)]
pub struct PendingConnection {
    key: String,
    socket: Arc<dyn SocketClient>,
    url: Url,
    options: SocketOptions,
}

impl PendingConnection {
    /// Directory key the client will be stored under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct ConnectionEntry {
    socket: Arc<dyn SocketClient>,
    url: Url,
    options: SocketOptions,
}

#[derive(Default)]
struct DirectoryInner {
    entries: HashMap<String, ConnectionEntry>,
    base_options: SocketOptions,
    /// Keys whose current connection has been asked to connect at least once.
    touched: HashSet<String>,
}

/// Owner of every socket client known to the bridge.
pub struct ConnectionDirectory {
    factory: Arc<dyn SocketFactory>,
    inner: Mutex<DirectoryInner>,
}

impl std::fmt::Debug for ConnectionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.keys();
        f.debug_struct("ConnectionDirectory")
            .field("factory", &self.factory)
            .field("keys", &keys)
            .finish_non_exhaustive()
    }
}

impl ConnectionDirectory {
    /// Create an empty directory that builds clients with `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn SocketFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(DirectoryInner::default()),
        }
    }

    /// Validate `url`, build a client and store it under the effective path.
    ///
    /// On failure nothing is stored and any previous entry is left as is.
    pub fn initialize(&self, url: &str, options: &SocketOptions) -> Result<Initialized, BridgeError> {
        let pending = self.prepare(url, options)?;
        Ok(self.insert(pending))
    }

    /// Validate `url` and build a client without storing it.
    ///
    /// The factory runs outside the directory lock.
    pub fn prepare(&self, url: &str, options: &SocketOptions) -> Result<PendingConnection, BridgeError> {
        let endpoint = validate_endpoint(url)?;
        let effective = self.lock().base_options.merged(options);
        let key = effective.path().to_string();

        let socket = self
            .factory
            .create(&endpoint, &effective)
            .map_err(|e| BridgeError::Factory(format!("{e:#}")))?;

        Ok(PendingConnection {
            key,
            socket,
            url: endpoint,
            options: effective,
        })
    }

    /// Store a prepared client, returning whatever it replaced.
    pub(crate) fn insert(&self, pending: PendingConnection) -> Initialized {
        let PendingConnection {
            key,
            socket,
            url,
            options,
        } = pending;

        let replaced = {
            let mut inner = self.lock();
            inner.touched.remove(&key);
            inner
                .entries
                .insert(
                    key.clone(),
                    ConnectionEntry {
                        socket: Arc::clone(&socket),
                        url,
                        options,
                    },
                )
                .map(|old| old.socket)
        };

        Initialized {
            key,
            socket,
            replaced,
        }
    }

    /// Look up the client stored under `key`. Absence is an expected outcome.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<Arc<dyn SocketClient>> {
        self.lock().entries.get(key).map(|e| Arc::clone(&e.socket))
    }

    /// Merge explicitly present fields into the base options.
    pub fn update_options(&self, options: &SocketOptions) {
        self.lock().base_options.merge(options);
    }

    /// Current base options.
    #[must_use]
    pub fn base_options(&self) -> SocketOptions {
        self.lock().base_options.clone()
    }

    /// Effective options and endpoint of the connection under `key`.
    #[must_use]
    pub fn describe(&self, key: &str) -> Option<(Url, SocketOptions)> {
        self.lock()
            .entries
            .get(key)
            .map(|e| (e.url.clone(), e.options.clone()))
    }

    /// Record that `key` has been asked to connect.
    pub fn mark_touched(&self, key: &str) {
        let mut inner = self.lock();
        if inner.entries.contains_key(key) {
            inner.touched.insert(key.to_string());
        }
    }

    /// Whether the connection under `key` has ever been asked to connect.
    #[must_use]
    pub fn is_touched(&self, key: &str) -> bool {
        self.lock().touched.contains(key)
    }

    /// Stored keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of every stored `(key, client)` pair.
    #[must_use]
    pub fn sockets(&self) -> Vec<(String, Arc<dyn SocketClient>)> {
        self.lock()
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), Arc::clone(&e.socket)))
            .collect()
    }

    /// Number of stored connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no connections are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop every entry, returning the released clients.
    ///
    /// Only bridge teardown may call this, after the registry has been
    /// closed; otherwise bound listeners would outlive their connection.
    pub(crate) fn clear(&self) -> Vec<Arc<dyn SocketClient>> {
        let mut inner = self.lock();
        inner.touched.clear();
        inner.entries.drain().map(|(_, e)| e.socket).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryInner> {
        self.inner.lock().expect("ConnectionDirectory mutex poisoned")
    }
}

/// Parse `url` as an absolute endpoint URI with a supported scheme and a host.
pub fn validate_endpoint(url: &str) -> Result<Url, BridgeError> {
    let parsed = Url::parse(url)
        .map_err(|e| BridgeError::Configuration(format!("Invalid URI '{url}': {e}")))?;

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(BridgeError::Configuration(format!(
            "Unsupported scheme '{}' in '{url}'",
            parsed.scheme()
        )));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(BridgeError::Configuration(format!("Missing host in '{url}'")));
    }

    Ok(parsed)
}
