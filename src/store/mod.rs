//! Deduplicating proxy store
//!
//! All records live in one backend hash (the namespace key) as
//! `address -> JSON record`, so there is at most one record per address.
//! Every operation checks a connection out of the pool and hands it back
//! before returning, discarding it when the command faulted.

pub mod connection;
pub mod memory;
pub mod redis_backend;

pub use connection::{
    Backend, Checkout, ConnectionPool, HashConnection, PoolConfig, PoolStatus, PooledConnection,
};
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

use crate::error::{BackendError, PoolError};
use crate::proxy::ProxyRecord;
use tracing::{debug, warn};

/// Proxy records keyed by address, reached through a connection pool
pub struct ProxyStore<B: Backend> {
    pool: ConnectionPool<B>,
    key: String,
}

impl<B: Backend> ProxyStore<B> {
    /// Create a store over `backend` using the namespace `key`
    pub fn new(backend: B, key: impl Into<String>, config: &PoolConfig) -> Result<Self, PoolError> {
        let key = key.into();
        if key.is_empty() {
            return Err(PoolError::Config("store key must not be empty".to_string()));
        }

        Ok(Self {
            pool: ConnectionPool::new(backend, config)?,
            key,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Hand the connection back and surface the command result
    ///
    /// Operations dropped before reaching this point discard their connection
    /// through the `Checkout` guard.
    fn finish<T>(&self, conn: Checkout<'_, B>, result: Result<T, BackendError>) -> Result<T, PoolError> {
        let faulted = result.as_ref().err().is_some_and(BackendError::is_fault);
        conn.release(faulted);
        Ok(result?)
    }

    /// Insert or overwrite the record for its address
    pub async fn put(&self, record: &ProxyRecord) -> Result<(), PoolError> {
        let value = serde_json::to_string(record).map_err(|source| PoolError::Serialization {
            address: record.address.clone(),
            source,
        })?;

        let mut conn = self.pool.checkout().await?;
        let result = conn.hset(&self.key, &record.address, &value).await;
        self.finish(conn, result)
    }

    /// Look up one record; `NotFound` is the normal answer for unknown addresses
    pub async fn get(&self, address: &str) -> Result<ProxyRecord, PoolError> {
        let mut conn = self.pool.checkout().await?;
        let result = conn.hget(&self.key, address).await;

        match self.finish(conn, result)? {
            Some(value) => decode(address, &value),
            None => Err(PoolError::NotFound(address.to_string())),
        }
    }

    /// Remove the record; absent addresses are not an error
    pub async fn delete(&self, address: &str) -> Result<(), PoolError> {
        let mut conn = self.pool.checkout().await?;
        let result = conn.hdel(&self.key, address).await;
        self.finish(conn, result)
    }

    /// Number of stored records, or 0 when the backend cannot be reached
    pub async fn count(&self) -> usize {
        match self.try_count().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to count stored proxies");
                0
            }
        }
    }

    async fn try_count(&self) -> Result<usize, PoolError> {
        let mut conn = self.pool.checkout().await?;
        let result = conn.hlen(&self.key).await;
        self.finish(conn, result)
    }

    /// Snapshot of every stored record
    ///
    /// Strict: a single undecodable entry fails the whole listing.
    pub async fn list_all(&self) -> Result<Vec<ProxyRecord>, PoolError> {
        let mut conn = self.pool.checkout().await?;
        let result = conn.hgetall(&self.key).await;
        let entries = self.finish(conn, result)?;

        let records = entries
            .iter()
            .map(|(address, value)| decode(address, value))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = records.len(), "Listed stored proxies");
        Ok(records)
    }

    /// Every stored record whose kind equals `kind`
    pub async fn list_by_kind(&self, kind: &str) -> Result<Vec<ProxyRecord>, PoolError> {
        let mut records = self.list_all().await?;
        records.retain(|r| r.kind == kind);
        Ok(records)
    }
}

fn decode(address: &str, value: &str) -> Result<ProxyRecord, PoolError> {
    serde_json::from_str(value).map_err(|source| PoolError::Deserialization {
        address: address.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    const KEY: &str = "proxy_pool";

    fn store(backend: &MemoryBackend) -> ProxyStore<MemoryBackend> {
        let config = PoolConfig::new()
            .with_max_size(4)
            .with_acquire_timeout(Some(Duration::from_millis(200)));
        ProxyStore::new(backend.clone(), KEY, &config).unwrap()
    }

    fn record(address: &str, kind: &str) -> ProxyRecord {
        ProxyRecord::new(address, kind).unwrap()
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = ProxyStore::new(MemoryBackend::new(), "", &PoolConfig::default());
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        let proxy = record("1.2.3.4:8080", "http");

        store.put(&proxy).await.unwrap();
        assert_eq!(store.count().await, 1);
        store.put(&proxy).await.unwrap();
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_put_overwrites_fields() {
        let backend = MemoryBackend::new();
        let store = store(&backend);

        store.put(&record("1.2.3.4:8080", "http")).await.unwrap();
        store.put(&record("1.2.3.4:8080", "https")).await.unwrap();

        let stored = store.get("1.2.3.4:8080").await.unwrap();
        assert_eq!(stored.kind, "https");
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store(&MemoryBackend::new());
        let err = store.get("9.9.9.9:80").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store(&MemoryBackend::new());
        store.put(&record("1.2.3.4:8080", "")).await.unwrap();

        store.delete("1.2.3.4:8080").await.unwrap();
        store.delete("1.2.3.4:8080").await.unwrap();

        assert!(store.get("1.2.3.4:8080").await.unwrap_err().is_not_found());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_count_degrades_to_zero() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        store.put(&record("1.2.3.4:8080", "")).await.unwrap();

        backend.inject_faults(1);
        assert_eq!(store.count().await, 0);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_list_all_and_by_kind() {
        let store = store(&MemoryBackend::new());
        store.put(&record("1.1.1.1:80", "A")).await.unwrap();
        store.put(&record("2.2.2.2:80", "B")).await.unwrap();
        store.put(&record("3.3.3.3:80", "A")).await.unwrap();

        let mut all: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.address)
            .collect();
        all.sort();
        assert_eq!(all, vec!["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"]);

        let a = store.list_by_kind("A").await.unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|r| r.kind == "A"));
        assert!(store.list_by_kind("C").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_all_is_strict_on_bad_payload() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        store.put(&record("1.1.1.1:80", "A")).await.unwrap();
        backend.insert_raw(KEY, "2.2.2.2:80", "{not json");

        let err = store.list_all().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::Deserialization { ref address, .. } if address == "2.2.2.2:80"
        ));
        assert!(store.list_by_kind("A").await.is_err());
        assert!(store.get("1.1.1.1:80").await.is_ok());
    }

    #[tokio::test]
    async fn test_faulted_command_discards_connection() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        store.put(&record("1.1.1.1:80", "")).await.unwrap();
        assert_eq!(store.pool_status().size, 1);

        backend.inject_faults(1);
        let err = store.delete("1.1.1.1:80").await.unwrap_err();
        assert!(err.is_fault());
        assert_eq!(store.pool_status().size, 0);
        assert_eq!(backend.open_connections(), 0);

        store.delete("1.1.1.1:80").await.unwrap();
        assert_eq!(backend.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_command_discards_connection() {
        let backend = MemoryBackend::new();
        let store = store(&backend);
        store.put(&record("1.1.1.1:80", "")).await.unwrap();
        assert_eq!(backend.dial_count(), 1);

        backend.set_latency(Duration::from_millis(200));
        let cancelled = tokio::time::timeout(Duration::from_millis(20), store.delete("1.1.1.1:80")).await;
        assert!(cancelled.is_err());
        assert_eq!(store.pool_status().size, 0);
        assert_eq!(backend.open_connections(), 0);

        backend.set_latency(Duration::ZERO);
        assert!(store.get("1.1.1.1:80").await.is_ok());
        assert_eq!(backend.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_surfaces_dial_failure() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(true);
        let store = store(&backend);

        let err = store.put(&record("1.1.1.1:80", "")).await.unwrap_err();
        assert!(matches!(err, PoolError::DialFailed(_)));
        assert!(matches!(store.list_all().await, Err(PoolError::DialFailed(_))));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_pool_capacity() {
        let backend = MemoryBackend::new();
        backend.set_latency(Duration::from_millis(5));
        let config = PoolConfig::new().with_max_size(3).with_acquire_timeout(None);
        let store = Arc::new(ProxyStore::new(backend.clone(), KEY, &config).unwrap());

        let tasks: Vec<_> = (0..30)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let proxy = ProxyRecord::candidate(format!("10.0.0.{}:8080", i)).unwrap();
                    store.put(&proxy).await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(backend.peak_open_connections() <= 3);
        assert_eq!(store.count().await, 30);
    }
}
