//! Errors surfaced across the bridge boundary.
//!
//! Only a handful of failures are ever reported to the consumer: everything
//! else (unknown connection keys, stale listener ids, unrecognized payload
//! shapes) degrades to a silent no-op so that UI-facing callers never crash
//! while racing a teardown.

/// Errors reported through the `initialize` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The target address is not a syntactically valid endpoint URI.
    Configuration(String),
    /// The socket factory refused to build a client.
    Factory(String),
    /// The bridge has been torn down; no new connections are accepted.
    Destroyed,
}

impl BridgeError {
    /// Stable kind name, used as the error prefix handed to Lua.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Factory(_) => "FactoryError",
            Self::Destroyed => "DestroyedError",
        }
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Self::Factory(msg) => write!(f, "Socket factory error: {msg}"),
            Self::Destroyed => write!(f, "Bridge has been destroyed"),
        }
    }
}

impl std::error::Error for BridgeError {}
