//! Periodic revalidation of every stored proxy

use crate::error::PoolError;
use crate::proxy::{Probe, ProxyRecord};
use crate::store::{Backend, ProxyStore};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default seconds between sweeps
const DEFAULT_INTERVAL_SECS: u64 = 900;

/// Default number of concurrent probes within one sweep
const DEFAULT_CONCURRENCY: usize = 10;

/// Sweeper settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Probes in flight at once during a sweep
    pub concurrency: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl SweeperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Sweeping,
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Store size before the sweep
    pub before: usize,
    /// Records probed
    pub checked: usize,
    /// Dead records removed
    pub evicted: usize,
    /// Dead records whose delete failed
    pub failed_deletes: usize,
    /// Store size after the sweep
    pub after: usize,
}

enum Verdict {
    Alive,
    Evicted,
    DeleteFailed,
}

/// Flips the sweeper back to idle however the cycle ends
struct SweepingGuard<'a>(&'a AtomicBool);

impl Drop for SweepingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Re-probes the whole store on an interval and evicts dead proxies
pub struct Sweeper<B: Backend> {
    store: Arc<ProxyStore<B>>,
    probe: Arc<dyn Probe>,
    config: SweeperConfig,
    sweeping: AtomicBool,
    shutdown: CancellationToken,
}

impl<B: Backend> Sweeper<B> {
    pub fn new(store: Arc<ProxyStore<B>>, probe: Arc<dyn Probe>, config: SweeperConfig) -> Self {
        Self {
            store,
            probe,
            config,
            sweeping: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn state(&self) -> SweepState {
        if self.sweeping.load(Ordering::SeqCst) {
            SweepState::Sweeping
        } else {
            SweepState::Idle
        }
    }

    /// Run one sweep over a snapshot of the store
    ///
    /// Fails only when the snapshot cannot be taken; a failed delete for one
    /// record is counted and the sweep carries on.
    pub async fn run_cycle(&self) -> Result<SweepOutcome, PoolError> {
        self.sweeping.store(true, Ordering::SeqCst);
        let _guard = SweepingGuard(&self.sweeping);

        let before = self.store.count().await;
        info!(records = before, "Revalidation sweep started");

        let records = self.store.list_all().await?;
        let checked = records.len();

        let store = &self.store;
        let probe = &self.probe;
        let verdicts = stream::iter(records)
            .map(|record| async move { revalidate(store.as_ref(), probe.as_ref(), record).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut outcome = SweepOutcome {
            before,
            checked,
            ..Default::default()
        };
        for verdict in verdicts {
            match verdict {
                Verdict::Alive => {}
                Verdict::Evicted => outcome.evicted += 1,
                Verdict::DeleteFailed => outcome.failed_deletes += 1,
            }
        }
        outcome.after = self.store.count().await;

        info!(
            records = outcome.after,
            checked = outcome.checked,
            evicted = outcome.evicted,
            failed_deletes = outcome.failed_deletes,
            "Revalidation sweep finished"
        );
        Ok(outcome)
    }

    /// Sweep immediately, then on every interval until cancelled
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("Sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {
                                info!("Sweeper shutting down mid-sweep");
                                break;
                            }
                            result = self.run_cycle() => {
                                if let Err(e) = result {
                                    error!(error = %e, "Revalidation sweep aborted");
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}

async fn revalidate<B: Backend>(
    store: &ProxyStore<B>,
    probe: &dyn Probe,
    record: ProxyRecord,
) -> Verdict {
    if probe.probe(&record).await {
        return Verdict::Alive;
    }

    match store.delete(&record.address).await {
        Ok(()) => Verdict::Evicted,
        Err(e) => {
            warn!(proxy = %record.address, error = %e, "Failed to evict dead proxy");
            Verdict::DeleteFailed
        }
    }
}
