//! In-process backend used for tests and dry runs
//!
//! Behaves like a single Redis instance holding hashes, and keeps counters
//! for dialed and currently open connections so pool discipline can be
//! observed from the outside.

use crate::error::BackendError;
use crate::store::connection::{Backend, HashConnection};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Hashes = HashMap<String, HashMap<String, String>>;

#[derive(Default)]
struct Shared {
    hashes: Mutex<Hashes>,
    dials: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    pending_faults: AtomicUsize,
    unreachable: AtomicBool,
    latency_ms: AtomicUsize,
}

/// Shared in-memory hash store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total connections dialed so far
    pub fn dial_count(&self) -> usize {
        self.shared.dials.load(Ordering::SeqCst)
    }

    /// Connections currently alive
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed
    pub fn peak_open_connections(&self) -> usize {
        self.shared.peak_open.load(Ordering::SeqCst)
    }

    /// Make the next `n` commands fail with a connection fault
    pub fn inject_faults(&self, n: usize) {
        self.shared.pending_faults.store(n, Ordering::SeqCst);
    }

    /// Refuse all dials while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.shared.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every command, keeping connections checked out longer
    pub fn set_latency(&self, latency: Duration) {
        self.shared
            .latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    /// Write a raw value, bypassing serialization
    pub fn insert_raw(&self, key: &str, field: &str, value: &str) {
        let mut hashes = self.shared.hashes.lock().unwrap_or_else(|e| e.into_inner());
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Connection = MemoryConnection;

    async fn dial(&self) -> Result<MemoryConnection, BackendError> {
        if self.shared.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Io("connection refused".to_string()));
        }

        self.shared.dials.fetch_add(1, Ordering::SeqCst);
        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_open.fetch_max(open, Ordering::SeqCst);

        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
        })
    }
}

/// One session against a `MemoryBackend`
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

impl MemoryConnection {
    async fn command<T>(&self, f: impl FnOnce(&mut Hashes) -> T) -> Result<T, BackendError> {
        let latency = self.shared.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency as u64)).await;
        }

        let faulted = self
            .shared
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if faulted {
            return Err(BackendError::Io("broken pipe".to_string()));
        }

        let mut hashes = self.shared.hashes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut hashes))
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HashConnection for MemoryConnection {
    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        self.command(|h| {
            h.entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        })
        .await
    }

    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        self.command(|h| h.get(key).and_then(|fields| fields.get(field).cloned()))
            .await
    }

    async fn hdel(&mut self, key: &str, field: &str) -> Result<(), BackendError> {
        self.command(|h| {
            if let Some(fields) = h.get_mut(key) {
                fields.remove(field);
            }
        })
        .await
    }

    async fn hlen(&mut self, key: &str) -> Result<usize, BackendError> {
        self.command(|h| h.get(key).map_or(0, |fields| fields.len()))
            .await
    }

    async fn hgetall(&mut self, key: &str) -> Result<Vec<(String, String)>, BackendError> {
        self.command(|h| {
            h.get(key).map_or_else(Vec::new, |fields| {
                fields
                    .iter()
                    .map(|(f, v)| (f.clone(), v.clone()))
                    .collect()
            })
        })
        .await
    }
}
