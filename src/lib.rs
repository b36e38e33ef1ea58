//! Proxy Pool - a self-maintaining pool of verified HTTP proxies
//!
//! Candidates harvested by collectors flow through a bounded ingestion queue
//! to a pool of validation workers. Proxies that answer a probe are stored
//! in a Redis hash keyed by address, a periodic sweeper re-probes the whole
//! store and evicts dead entries, and consumers draw random proxies from it.

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod proxy;
pub mod store;

pub use config::Config;
pub use error::{BackendError, PoolError};
pub use manager::{AddOutcome, Engine, EngineHandle, ProxyManager};
pub use proxy::{Collector, Probe, ProxyChecker, ProxyRecord, ProxyType};
pub use store::{MemoryBackend, ProxyStore, RedisBackend};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
