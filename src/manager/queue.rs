//! Bounded ingestion queue between collectors and validation workers
//!
//! The queue is the only backpressure mechanism: producers block once it is
//! full, collection rounds are only launched while occupancy is below the low
//! water mark, and a round that pushes occupancy up to the high water mark
//! pauses until workers drain it back below the low water mark.

use crate::error::PoolError;
use crate::proxy::ProxyRecord;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default number of queued candidates
const DEFAULT_QUEUE_CAPACITY: usize = 2000;

/// Default number of validation workers
const DEFAULT_WORKERS: usize = 50;

/// Occupancy below which a new collection round may start
const DEFAULT_LOW_WATER: usize = 100;

/// Occupancy at which feeding pauses
const DEFAULT_HIGH_WATER: usize = 1900;

/// Default seconds between scheduler ticks
const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 600;

/// Ingestion settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Fixed number of queue slots
    pub queue_capacity: usize,
    /// Number of concurrent validation workers
    pub workers: usize,
    /// Launch collection rounds only below this occupancy
    pub low_water: usize,
    /// Pause feeding at this occupancy
    pub high_water: usize,
    /// Seconds between scheduler ticks
    pub schedule_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            low_water: DEFAULT_LOW_WATER,
            high_water: DEFAULT_HIGH_WATER,
            schedule_interval_secs: DEFAULT_SCHEDULE_INTERVAL_SECS,
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_watermarks(mut self, low: usize, high: usize) -> Self {
        self.low_water = low;
        self.high_water = high;
        self
    }

    pub fn with_schedule_interval(mut self, interval: Duration) -> Self {
        self.schedule_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.queue_capacity == 0 {
            return Err(PoolError::Config("ingest queue_capacity must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(PoolError::Config("ingest workers must be at least 1".to_string()));
        }
        if self.low_water >= self.high_water {
            return Err(PoolError::Config(format!(
                "ingest low_water ({}) must be below high_water ({})",
                self.low_water, self.high_water
            )));
        }
        if self.high_water > self.queue_capacity {
            return Err(PoolError::Config(format!(
                "ingest high_water ({}) exceeds queue_capacity ({})",
                self.high_water, self.queue_capacity
            )));
        }
        Ok(())
    }
}

/// Bounded FIFO of candidates awaiting validation
pub struct IngestQueue {
    tx: mpsc::Sender<ProxyRecord>,
    rx: Mutex<mpsc::Receiver<ProxyRecord>>,
    drained: Notify,
    throttled: AtomicBool,
    low_water: usize,
    high_water: usize,
}

impl IngestQueue {
    pub fn new(config: &IngestConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        Ok(Self {
            tx,
            rx: Mutex::new(rx),
            drained: Notify::new(),
            throttled: AtomicBool::new(false),
            low_water: config.low_water,
            high_water: config.high_water,
        })
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Candidates currently queued
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the scheduler may launch a new collection round
    pub fn should_launch(&self) -> bool {
        self.len() < self.low_water
    }

    /// Whether feeding may continue, updating the high/low water hysteresis
    pub fn admits(&self) -> bool {
        let occupancy = self.len();

        if self.throttled.load(Ordering::SeqCst) {
            if occupancy < self.low_water
                && self
                    .throttled
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                info!(occupancy, "Ingestion queue drained, resuming feed");
            }
        } else if occupancy >= self.high_water
            && self
                .throttled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            info!(occupancy, "Ingestion queue at high water, pausing feed");
        }

        !self.throttled.load(Ordering::SeqCst)
    }

    /// Enqueue one candidate, waiting for a free slot; false once closed
    pub async fn push(&self, candidate: ProxyRecord) -> bool {
        self.tx.send(candidate).await.is_ok()
    }

    /// Take the next candidate, waiting while the queue is empty
    pub async fn recv(&self) -> Option<ProxyRecord> {
        let candidate = self.rx.lock().await.recv().await;
        self.drained.notify_waiters();
        candidate
    }

    /// Push a collector's candidates, honoring the water marks
    ///
    /// Returns how many candidates were enqueued before finishing or being
    /// cancelled.
    pub async fn feed(&self, candidates: Vec<ProxyRecord>, shutdown: &CancellationToken) -> usize {
        let mut sent = 0;

        for candidate in candidates {
            loop {
                let drained = self.drained.notified();
                if self.admits() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return sent,
                    _ = drained => {}
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return sent,
                pushed = self.push(candidate) => {
                    if !pushed {
                        return sent;
                    }
                }
            }
            sent += 1;
        }

        debug!(sent, occupancy = self.len(), "Feed finished");
        sent
    }
}
