//! Connection options and the field-level merge applied to them.
//!
//! Every field is optional. A field is applied only when explicitly present,
//! so merging a partial options value never resets fields it does not name.
//!
//! Keys follow the Socket.IO client's camelCase names (`forceNew`,
//! `reconnectionDelayMax`, ...). Snake-case aliases are accepted so Lua
//! scripts can use either spelling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Namespace path used when no `path` option is given.
pub const DEFAULT_PATH: &str = "/socket.io";

/// Options recognized by `initialize` and `updateOptions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketOptions {
    /// Allowed transports, in preference order (e.g. `["websocket"]`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
    /// Create a fresh manager instead of reusing a cached one.
    #[serde(alias = "force_new", skip_serializing_if = "Option::is_none")]
    pub force_new: Option<bool>,
    /// Share one manager between sockets to the same host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplex: Option<bool>,
    /// Reconnection attempts before giving up.
    #[serde(alias = "reconnection_attempts", skip_serializing_if = "Option::is_none")]
    pub reconnection_attempts: Option<i64>,
    /// Initial reconnection delay in milliseconds.
    #[serde(alias = "reconnection_delay", skip_serializing_if = "Option::is_none")]
    pub reconnection_delay: Option<u64>,
    /// Upper bound on the reconnection delay in milliseconds.
    #[serde(alias = "reconnection_delay_max", skip_serializing_if = "Option::is_none")]
    pub reconnection_delay_max: Option<u64>,
    /// Jitter applied to reconnection delays (0.0 - 1.0).
    #[serde(alias = "randomization_factor", skip_serializing_if = "Option::is_none")]
    pub randomization_factor: Option<f64>,
    /// Connection timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Pre-serialized query string sent with the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Server path; also the connection key in the directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl SocketOptions {
    /// Parse options from a JSON value.
    ///
    /// `null` and empty containers yield the default (all fields absent).
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match &value {
            serde_json::Value::Null => return Ok(Self::default()),
            serde_json::Value::Array(items) if items.is_empty() => return Ok(Self::default()),
            _ => {}
        }
        serde_json::from_value(value).context("Invalid socket options")
    }

    /// Overwrite the fields that are present in `other`.
    pub fn merge(&mut self, other: &SocketOptions) {
        fn apply<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
            if let Some(value) = incoming {
                *slot = Some(value.clone());
            }
        }

        apply(&mut self.transports, &other.transports);
        apply(&mut self.force_new, &other.force_new);
        apply(&mut self.multiplex, &other.multiplex);
        apply(&mut self.reconnection_attempts, &other.reconnection_attempts);
        apply(&mut self.reconnection_delay, &other.reconnection_delay);
        apply(&mut self.reconnection_delay_max, &other.reconnection_delay_max);
        apply(&mut self.randomization_factor, &other.randomization_factor);
        apply(&mut self.timeout, &other.timeout);
        apply(&mut self.query, &other.query);
        apply(&mut self.path, &other.path);
    }

    /// A copy of `self` with `other` merged on top.
    #[must_use]
    pub fn merged(&self, other: &SocketOptions) -> Self {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// The configured path, or [`DEFAULT_PATH`].
    #[must_use]
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_PATH)
    }
}

/// Resolve an optional path argument to a directory key.
#[must_use]
pub fn path_key(path: Option<&str>) -> &str {
    path.unwrap_or(DEFAULT_PATH)
}

/// Serialize key/value pairs into a handshake query string.
///
/// Pairs are sorted by key so the same table always produces the same
/// string. Values are form-urlencoded.
pub fn serialize_query<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(K, V)> = pairs.into_iter().collect();
    pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}
