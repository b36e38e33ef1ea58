//! Background task wiring
//!
//! `Engine::start` spawns the validation workers, the revalidation sweeper
//! and the collection scheduler under one cancellation token.

use crate::config::Config;
use crate::error::PoolError;
use crate::manager::queue::IngestQueue;
use crate::manager::scheduler::Scheduler;
use crate::manager::sweeper::Sweeper;
use crate::manager::worker::spawn_workers;
use crate::manager::ProxyManager;
use crate::proxy::Collector;
use crate::store::Backend;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Engine;

impl Engine {
    /// Start every background task of the pool
    pub fn start<B: Backend>(
        config: &Config,
        manager: Arc<ProxyManager<B>>,
        collectors: Vec<Arc<dyn Collector>>,
        shutdown: CancellationToken,
    ) -> Result<EngineHandle, PoolError> {
        let queue = Arc::new(IngestQueue::new(&config.ingest)?);

        let mut tasks = spawn_workers(
            config.ingest.workers,
            Arc::clone(&queue),
            Arc::clone(&manager),
            shutdown.clone(),
        );

        let sweeper = Sweeper::new(
            Arc::clone(manager.store()),
            Arc::clone(manager.probe()),
            config.sweeper.clone(),
        )
        .with_cancellation(shutdown.clone());
        tasks.push(Arc::new(sweeper).start());

        let scheduler = Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(manager.store()),
            collectors,
            config.ingest.schedule_interval(),
        )
        .with_cancellation(shutdown.clone());
        tasks.push(Arc::new(scheduler).start());

        info!(
            workers = config.ingest.workers,
            queue_capacity = queue.capacity(),
            "Proxy pool engine started"
        );

        Ok(EngineHandle {
            queue,
            shutdown,
            tasks,
        })
    }
}

/// Owns the spawned tasks of a running engine
pub struct EngineHandle {
    queue: Arc<IngestQueue>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn queue(&self) -> &Arc<IngestQueue> {
        &self.queue
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every task and wait for them to exit
    pub async fn shutdown(self) {
        info!("Stopping proxy pool engine");
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Proxy pool engine stopped");
    }
}
