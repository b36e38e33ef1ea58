//! Bounded pool of backend connections
//!
//! Connections are dialed on demand up to `max_size`. A connection that saw
//! an I/O fault while checked out is released with `faulted = true` and taken
//! out of the pool for good; the next acquire dials a replacement.

use crate::error::{BackendError, PoolError};
use async_trait::async_trait;
use deadpool::managed::{self, Object, TimeoutType};
use deadpool::Runtime;
use serde::Deserialize;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::{debug, warn};

/// Default maximum number of live backend connections
const DEFAULT_MAX_SIZE: usize = 20;

/// Default time to wait for a free connection before giving up
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Default time allowed for dialing a new connection
const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;

/// Dials sessions to the key-value backend
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Connection: HashConnection;

    async fn dial(&self) -> Result<Self::Connection, BackendError>;
}

/// Hash commands against one namespace key
///
/// Every method is a single atomic backend command.
#[async_trait]
pub trait HashConnection: Send + 'static {
    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), BackendError>;

    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, BackendError>;

    async fn hdel(&mut self, key: &str, field: &str) -> Result<(), BackendError>;

    async fn hlen(&mut self, key: &str) -> Result<usize, BackendError>;

    /// All `(field, value)` pairs under `key`
    async fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>, BackendError>;
}

/// Connection pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections alive at once
    pub max_size: usize,
    /// How long `acquire` waits for a free connection; `0` waits forever
    pub acquire_timeout_ms: u64,
    /// How long dialing a fresh connection may take
    pub dial_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        self
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }

    pub fn dial_timeout(&self) -> Option<Duration> {
        (self.dial_timeout_ms > 0).then(|| Duration::from_millis(self.dial_timeout_ms))
    }
}

/// deadpool manager dialing through a `Backend`
pub struct BackendManager<B: Backend> {
    backend: B,
}

impl<B: Backend> managed::Manager for BackendManager<B> {
    type Type = B::Connection;
    type Error = BackendError;

    async fn create(&self) -> Result<B::Connection, BackendError> {
        debug!("Dialing new backend connection");
        self.backend.dial().await
    }

    async fn recycle(
        &self,
        _conn: &mut B::Connection,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<BackendError> {
        // Faulted connections never make it back here
        Ok(())
    }
}

/// A checked-out connection; dropping it returns it to the pool
pub type PooledConnection<B> = Object<BackendManager<B>>;

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured capacity
    pub max_size: usize,
    /// Connections currently alive (idle + checked out)
    pub size: usize,
    /// Idle connections ready for reuse
    pub available: usize,
    /// Callers blocked in `acquire`
    pub waiting: usize,
}

impl PoolStatus {
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available)
    }
}

/// Capacity-bounded pool with discard-on-fault release
pub struct ConnectionPool<B: Backend> {
    pool: managed::Pool<BackendManager<B>>,
}

impl<B: Backend> ConnectionPool<B> {
    /// Build the pool; no connection is dialed until first use
    pub fn new(backend: B, config: &PoolConfig) -> Result<Self, PoolError> {
        if config.max_size == 0 {
            return Err(PoolError::Config("pool max_size must be at least 1".to_string()));
        }

        let pool = managed::Pool::builder(BackendManager { backend })
            .max_size(config.max_size)
            .wait_timeout(config.acquire_timeout())
            .create_timeout(config.dial_timeout())
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| PoolError::Config(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Check out an idle connection or dial a new one below capacity
    ///
    /// Blocks while the pool is at capacity, up to the acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection<B>, PoolError> {
        self.pool.get().await.map_err(|e| match e {
            managed::PoolError::Timeout(TimeoutType::Wait) => PoolError::PoolExhausted {
                max_size: self.pool.status().max_size,
            },
            managed::PoolError::Timeout(_) => {
                PoolError::DialFailed("timed out dialing backend".to_string())
            }
            managed::PoolError::Backend(e) => PoolError::DialFailed(e.to_string()),
            managed::PoolError::Closed => PoolError::PoolClosed,
            other => PoolError::DialFailed(other.to_string()),
        })
    }

    /// Check out a connection that is discarded unless explicitly released
    ///
    /// A command future dropped mid-flight (cancellation, timeout) leaves the
    /// connection in an unknown state, so the guard takes it out of the pool.
    pub async fn checkout(&self) -> Result<Checkout<'_, B>, PoolError> {
        let conn = self.acquire().await?;
        Ok(Checkout {
            pool: self,
            conn: Some(conn),
        })
    }

    /// Return a connection, discarding it if it faulted while in use
    pub fn release(&self, conn: PooledConnection<B>, faulted: bool) {
        if faulted {
            warn!("Discarding faulted backend connection");
            drop(Object::take(conn));
        } else {
            drop(conn);
        }
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

/// Scoped connection from `ConnectionPool::checkout`
pub struct Checkout<'a, B: Backend> {
    pool: &'a ConnectionPool<B>,
    conn: Option<PooledConnection<B>>,
}

impl<B: Backend> Checkout<'_, B> {
    /// Hand the connection back, discarding it when `faulted`
    pub fn release(mut self, faulted: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, faulted);
        }
    }
}

impl<B: Backend> Deref for Checkout<'_, B> {
    type Target = B::Connection;

    fn deref(&self) -> &B::Connection {
        // Only `release` and `drop` empty the slot, and both consume the guard
        self.conn.as_deref().expect("checkout already released")
    }
}

impl<B: Backend> DerefMut for Checkout<'_, B> {
    fn deref_mut(&mut self) -> &mut B::Connection {
        self.conn.as_deref_mut().expect("checkout already released")
    }
}

impl<B: Backend> Drop for Checkout<'_, B> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("Connection abandoned mid-command, discarding");
            drop(Object::take(conn));
        }
    }
}
