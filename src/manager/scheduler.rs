//! Collection scheduling
//!
//! On every tick the scheduler logs queue occupancy and store size, and
//! launches a collection round only while the ingestion queue is below its
//! low water mark and no earlier round is still feeding.

use crate::manager::queue::IngestQueue;
use crate::proxy::Collector;
use crate::store::{Backend, ProxyStore};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Scheduler<B: Backend> {
    queue: Arc<IngestQueue>,
    store: Arc<ProxyStore<B>>,
    collectors: Arc<Vec<Arc<dyn Collector>>>,
    interval: Duration,
    round_active: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl<B: Backend> Scheduler<B> {
    pub fn new(
        queue: Arc<IngestQueue>,
        store: Arc<ProxyStore<B>>,
        collectors: Vec<Arc<dyn Collector>>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            collectors: Arc::new(collectors),
            interval,
            round_active: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Inspect occupancy and maybe launch a round
    ///
    /// Returns the handle of the launched round, which resolves to the number
    /// of candidates enqueued.
    pub async fn tick(&self) -> Option<JoinHandle<usize>> {
        let occupancy = self.queue.len();
        let stored = self.store.count().await;
        info!(queue = occupancy, proxies = stored, "Scheduler tick");

        if !self.queue.should_launch() {
            return None;
        }
        if self.round_active.swap(true, Ordering::SeqCst) {
            info!("Previous collection round still running, skipping");
            return None;
        }

        let collectors = Arc::clone(&self.collectors);
        let queue = Arc::clone(&self.queue);
        let round_active = Arc::clone(&self.round_active);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let sent = run_round(&collectors, &queue, &shutdown).await;
            round_active.store(false, Ordering::SeqCst);
            sent
        }))
    }

    /// Tick immediately, then on every interval until cancelled
    ///
    /// The returned task resolves only after the last launched round has
    /// stopped.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut round: Option<JoinHandle<usize>> = None;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("Scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Some(launched) = self.tick().await {
                            if let Some(previous) = round.replace(launched) {
                                join_round(previous).await;
                            }
                        }
                    }
                }
            }

            if let Some(round) = round {
                join_round(round).await;
            }
        })
    }
}

async fn join_round(round: JoinHandle<usize>) {
    if let Err(e) = round.await {
        warn!(error = %e, "Collection round ended abnormally");
    }
}

/// Run every collector concurrently, feeding results into the queue as each finishes
async fn run_round(
    collectors: &[Arc<dyn Collector>],
    queue: &IngestQueue,
    shutdown: &CancellationToken,
) -> usize {
    info!(collectors = collectors.len(), "Collection round started");

    let fed = join_all(collectors.iter().map(|collector| async move {
        let collected = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(collector = collector.name(), "Collector interrupted by shutdown");
                return 0;
            }
            collected = collector.collect() => collected,
        };

        match collected {
            Ok(candidates) => {
                let found = candidates.len();
                let sent = queue.feed(candidates, shutdown).await;
                info!(collector = collector.name(), found, sent, "Collector finished");
                sent
            }
            Err(e) => {
                warn!(collector = collector.name(), error = %e, "Collector failed");
                0
            }
        }
    }))
    .await;

    let total = fed.iter().sum();
    info!(candidates = total, "Collection round finished");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::queue::IngestConfig;
    use crate::proxy::ProxyRecord;
    use crate::store::{MemoryBackend, PoolConfig};
    use crate::Result;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FixedCollector {
        addresses: Vec<String>,
        calls: AtomicUsize,
    }

    impl FixedCollector {
        fn new(addresses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                addresses: addresses.iter().map(|a| a.to_string()).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Collector for FixedCollector {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn collect(&self) -> Result<Vec<ProxyRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .addresses
                .iter()
                .filter_map(|a| ProxyRecord::candidate(a.as_str()).ok())
                .collect())
        }
    }

    struct BrokenCollector;

    #[async_trait]
    impl Collector for BrokenCollector {
        fn name(&self) -> &str {
            "broken"
        }

        async fn collect(&self) -> Result<Vec<ProxyRecord>> {
            Err(anyhow!("site layout changed"))
        }
    }

    fn scheduler(
        queue: &Arc<IngestQueue>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Scheduler<MemoryBackend> {
        let store = ProxyStore::new(MemoryBackend::new(), "proxy_pool", &PoolConfig::default()).unwrap();
        Scheduler::new(
            Arc::clone(queue),
            Arc::new(store),
            collectors,
            Duration::from_secs(600),
        )
    }

    fn queue(capacity: usize, low: usize, high: usize) -> Arc<IngestQueue> {
        let config = IngestConfig::new()
            .with_queue_capacity(capacity)
            .with_watermarks(low, high);
        Arc::new(IngestQueue::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_round_feeds_all_collectors() {
        let queue = queue(100, 10, 90);
        let first = FixedCollector::new(&["1.1.1.1:80", "2.2.2.2:80"]);
        let second = FixedCollector::new(&["3.3.3.3:80"]);
        let collectors: Vec<Arc<dyn Collector>> =
            vec![first.clone(), second.clone(), Arc::new(BrokenCollector)];
        let scheduler = scheduler(&queue, collectors);

        let round = scheduler.tick().await.expect("round should launch");
        assert_eq!(round.await.unwrap(), 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_launch_at_or_above_low_water() {
        let queue = queue(100, 2, 90);
        queue.push(ProxyRecord::candidate("9.9.9.9:80").unwrap()).await;
        queue.push(ProxyRecord::candidate("9.9.9.8:80").unwrap()).await;

        let collector = FixedCollector::new(&["1.1.1.1:80"]);
        let collectors: Vec<Arc<dyn Collector>> = vec![collector.clone()];
        let scheduler = scheduler(&queue, collectors);

        assert!(scheduler.tick().await.is_none());
        assert_eq!(collector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 2);
    }

    /// Collector that blocks until released
    struct GatedCollector {
        gate: tokio::sync::Semaphore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Collector for GatedCollector {
        fn name(&self) -> &str {
            "gated"
        }

        async fn collect(&self) -> Result<Vec<ProxyRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await?;
            Ok(vec![ProxyRecord::candidate("1.1.1.1:80")?])
        }
    }

    #[tokio::test]
    async fn test_no_overlapping_rounds() {
        let queue = queue(100, 10, 90);
        let collector = Arc::new(GatedCollector {
            gate: tokio::sync::Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let collectors: Vec<Arc<dyn Collector>> = vec![collector.clone()];
        let scheduler = scheduler(&queue, collectors);

        let round = scheduler.tick().await.expect("first round launches");
        assert!(scheduler.tick().await.is_none());

        collector.gate.add_permits(1);
        assert_eq!(round.await.unwrap(), 1);

        let round = scheduler.tick().await.expect("next round launches");
        collector.gate.add_permits(1);
        round.await.unwrap();
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_started_scheduler_stops_on_cancel() {
        let queue = queue(100, 10, 90);
        let shutdown = CancellationToken::new();
        let collectors: Vec<Arc<dyn Collector>> = vec![FixedCollector::new(&["1.1.1.1:80"])];
        let scheduler =
            Arc::new(scheduler(&queue, collectors).with_cancellation(shutdown.clone()));
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_interrupts_collecting_round() {
        let queue = queue(100, 10, 90);
        let shutdown = CancellationToken::new();
        let collector = Arc::new(GatedCollector {
            gate: tokio::sync::Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let collectors: Vec<Arc<dyn Collector>> = vec![collector.clone()];
        let scheduler =
            Arc::new(scheduler(&queue, collectors).with_cancellation(shutdown.clone()));
        let handle = scheduler.start();

        while collector.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        // Round task and scheduler are gone, so only this handle remains
        assert_eq!(Arc::strong_count(&collector), 1);
        assert_eq!(queue.len(), 0);
    }
}
