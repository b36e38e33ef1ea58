//! Error types for the proxy pool core
//!
//! `PoolError` is what store, connection pool and selection operations
//! return. `BackendError` is raised by a single backend command and knows
//! whether the connection it ran on can still be trusted.

use thiserror::Error;

/// Errors surfaced by the proxy pool core
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No record stored under this address
    #[error("proxy not found: {0}")]
    NotFound(String),

    /// Every connection is checked out and none freed up in time
    #[error("connection pool exhausted ({max_size} connections in use)")]
    PoolExhausted { max_size: usize },

    /// A fresh backend connection could not be established
    #[error("failed to dial backend: {0}")]
    DialFailed(String),

    /// The connection pool has been closed
    #[error("connection pool is closed")]
    PoolClosed,

    /// A backend command failed on an established connection
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A record could not be encoded for storage
    #[error("failed to encode record {address}: {source}")]
    Serialization {
        address: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored payload could not be decoded
    #[error("failed to decode record {address}: {source}")]
    Deserialization {
        address: String,
        #[source]
        source: serde_json::Error,
    },

    /// No records are available to satisfy a selection
    #[error("no proxies available")]
    EmptyPool,

    /// The address is not a `host:port` pair
    #[error("invalid proxy address: {0:?}")]
    InvalidAddress(String),

    /// A proxy type name that cannot be probed
    #[error("unsupported proxy type {0:?} (use http, https, socks5)")]
    UnsupportedProxyType(String),

    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Whether this is the expected "absent" outcome of a lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::NotFound(_))
    }

    /// Whether the connection used for the failed operation must be discarded
    pub fn is_fault(&self) -> bool {
        matches!(self, PoolError::Backend(e) if e.is_fault())
    }
}

/// Error raised by a single backend command
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The connection itself broke (I/O error, dropped, timed out)
    #[error("backend connection fault: {0}")]
    Io(String),

    /// The backend answered but rejected the command
    #[error("backend command rejected: {0}")]
    Command(String),
}

impl BackendError {
    /// Faulted connections are never handed back to the pool
    pub fn is_fault(&self) -> bool {
        matches!(self, BackendError::Io(_))
    }
}

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            BackendError::Io(err.to_string())
        } else {
            BackendError::Command(err.to_string())
        }
    }
}
