//! Proxy lifecycle management
//!
//! This module provides:
//! - `ProxyManager`: validate-then-insert for candidates and the consumer
//!   selection API (`random`, `find_by_kind`, `count`)
//! - The ingestion queue, validation workers, revalidation sweeper and
//!   collection scheduler, wired together by `Engine`

pub mod engine;
pub mod queue;
pub mod scheduler;
pub mod sweeper;
pub mod worker;

pub use engine::{Engine, EngineHandle};
pub use queue::{IngestConfig, IngestQueue};
pub use scheduler::Scheduler;
pub use sweeper::{SweepOutcome, SweepState, Sweeper, SweeperConfig};

use crate::error::PoolError;
use crate::proxy::{Probe, ProxyRecord};
use crate::store::{Backend, ProxyStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// What happened to a candidate handed to `check_and_add`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Probe passed and the proxy was new
    Added,
    /// Probe passed but the address was already stored
    AlreadyPresent,
    /// Probe failed; the candidate was discarded
    Dead,
}

/// Validates candidates into the store and serves selections from it
pub struct ProxyManager<B: Backend> {
    store: Arc<ProxyStore<B>>,
    probe: Arc<dyn Probe>,
    rng: Mutex<StdRng>,
}

impl<B: Backend> ProxyManager<B> {
    pub fn new(store: Arc<ProxyStore<B>>, probe: Arc<dyn Probe>) -> Self {
        Self {
            store,
            probe,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Use a specific random source for selections
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn store(&self) -> &Arc<ProxyStore<B>> {
        &self.store
    }

    pub fn probe(&self) -> &Arc<dyn Probe> {
        &self.probe
    }

    /// Probe a candidate and store it if it is alive and not yet known
    pub async fn check_and_add(&self, candidate: ProxyRecord) -> Result<AddOutcome, PoolError> {
        if !self.probe.probe(&candidate).await {
            debug!(proxy = %candidate.address, "Discarding dead candidate");
            return Ok(AddOutcome::Dead);
        }
        self.add(candidate.mark_checked()).await
    }

    /// Store a record unless its address is already present
    pub async fn add(&self, record: ProxyRecord) -> Result<AddOutcome, PoolError> {
        match self.store.get(&record.address).await {
            Ok(_) => Ok(AddOutcome::AlreadyPresent),
            Err(e) if e.is_not_found() => {
                self.store.put(&record).await?;
                debug!(proxy = %record.address, kind = %record.kind, "Added proxy");
                Ok(AddOutcome::Added)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn remove(&self, address: &str) -> Result<(), PoolError> {
        self.store.delete(address).await
    }

    /// Uniformly pick one stored proxy
    pub async fn random(&self) -> Result<ProxyRecord, PoolError> {
        let records = self.store.list_all().await?;
        self.pick(records)
    }

    /// Uniformly pick one stored proxy of the given kind
    pub async fn find_by_kind(&self, kind: &str) -> Result<ProxyRecord, PoolError> {
        let records = self.store.list_by_kind(kind).await?;
        self.pick(records)
    }

    pub async fn count(&self) -> usize {
        self.store.count().await
    }

    fn pick(&self, mut records: Vec<ProxyRecord>) -> Result<ProxyRecord, PoolError> {
        if records.is_empty() {
            return Err(PoolError::EmptyPool);
        }

        // Backend listing order is arbitrary; sort so a seeded rng is reproducible
        records.sort_unstable_by(|a, b| a.address.cmp(&b.address));
        let index = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .random_range(0..records.len());
        Ok(records.swap_remove(index))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe with a fixed answer per address
    #[derive(Default)]
    pub struct StubProbe {
        alive: Mutex<HashSet<String>>,
        calls: AtomicUsize,
    }

    impl StubProbe {
        pub fn alive<'a>(addresses: impl IntoIterator<Item = &'a str>) -> Arc<Self> {
            let probe = Self::default();
            probe
                .alive
                .lock()
                .unwrap()
                .extend(addresses.into_iter().map(str::to_string));
            Arc::new(probe)
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for StubProbe {
        async fn probe(&self, proxy: &ProxyRecord) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.alive.lock().unwrap().contains(&proxy.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StubProbe;
    use super::*;
    use crate::store::{MemoryBackend, PoolConfig};

    fn manager(probe: Arc<StubProbe>) -> ProxyManager<MemoryBackend> {
        let store = ProxyStore::new(MemoryBackend::new(), "proxy_pool", &PoolConfig::default()).unwrap();
        ProxyManager::new(Arc::new(store), probe)
    }

    fn record(address: &str, kind: &str) -> ProxyRecord {
        ProxyRecord::new(address, kind).unwrap()
    }

    #[tokio::test]
    async fn test_check_and_add_live_candidate() {
        let manager = manager(StubProbe::alive(["1.2.3.4:8080"]));

        let outcome = manager.check_and_add(record("1.2.3.4:8080", "http")).await.unwrap();
        assert_eq!(outcome, AddOutcome::Added);
        assert_eq!(manager.count().await, 1);

        let stored = manager.store().get("1.2.3.4:8080").await.unwrap();
        assert!(stored.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_check_and_add_dead_candidate() {
        let manager = manager(StubProbe::alive([]));

        let outcome = manager.check_and_add(record("1.2.3.4:8080", "")).await.unwrap();
        assert_eq!(outcome, AddOutcome::Dead);
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_add_skips_known_address() {
        let manager = manager(StubProbe::alive(["1.2.3.4:8080"]));
        manager.add(record("1.2.3.4:8080", "A")).await.unwrap();

        let outcome = manager.check_and_add(record("1.2.3.4:8080", "B")).await.unwrap();
        assert_eq!(outcome, AddOutcome::AlreadyPresent);
        assert_eq!(manager.count().await, 1);
        assert_eq!(manager.store().get("1.2.3.4:8080").await.unwrap().kind, "A");
    }

    #[tokio::test]
    async fn test_racing_adds_leave_one_record() {
        let manager = Arc::new(manager(StubProbe::alive(["1.2.3.4:8080"])));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.check_and_add(record("1.2.3.4:8080", "")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_random_on_empty_pool() {
        let manager = manager(StubProbe::alive([]));
        assert!(matches!(manager.random().await, Err(PoolError::EmptyPool)));
    }

    #[tokio::test]
    async fn test_find_by_kind_without_match() {
        let manager = manager(StubProbe::alive([]));
        manager.add(record("1.1.1.1:80", "A")).await.unwrap();
        manager.add(record("2.2.2.2:80", "A")).await.unwrap();

        assert!(matches!(manager.find_by_kind("B").await, Err(PoolError::EmptyPool)));
        assert_eq!(manager.find_by_kind("A").await.unwrap().kind, "A");
    }

    #[tokio::test]
    async fn test_seeded_selection_is_reproducible() {
        let probe = StubProbe::alive([]);
        let store = Arc::new(
            ProxyStore::new(MemoryBackend::new(), "proxy_pool", &PoolConfig::default()).unwrap(),
        );
        for i in 1..=20 {
            store.put(&record(&format!("10.0.0.{}:80", i), "")).await.unwrap();
        }

        let first = ProxyManager::new(Arc::clone(&store), probe.clone())
            .with_rng(StdRng::seed_from_u64(7));
        let second = ProxyManager::new(Arc::clone(&store), probe)
            .with_rng(StdRng::seed_from_u64(7));

        let mut a = Vec::new();
        let mut b = Vec::new();
        for _ in 0..5 {
            a.push(first.random().await.unwrap().address);
            b.push(second.random().await.unwrap().address);
        }
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_selection_with_single_record() {
        let manager = manager(StubProbe::alive([])).with_rng(StdRng::seed_from_u64(1));
        manager.add(record("5.6.7.8:3128", "A")).await.unwrap();
        assert_eq!(manager.random().await.unwrap().address, "5.6.7.8:3128");
    }
}
