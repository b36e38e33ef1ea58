//! Validation workers draining the ingestion queue

use crate::manager::queue::IngestQueue;
use crate::manager::{AddOutcome, ProxyManager};
use crate::store::Backend;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn `count` workers, each looping dequeue -> probe -> dedup -> put
///
/// Workers are independent; a store failure for one candidate is logged and
/// the worker moves on to the next.
pub fn spawn_workers<B: Backend>(
    count: usize,
    queue: Arc<IngestQueue>,
    manager: Arc<ProxyManager<B>>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    info!(workers = count, "Starting validation workers");

    (0..count)
        .map(|id| {
            let queue = Arc::clone(&queue);
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_worker(id, queue, manager, shutdown).await })
        })
        .collect()
}

async fn run_worker<B: Backend>(
    id: usize,
    queue: Arc<IngestQueue>,
    manager: Arc<ProxyManager<B>>,
    shutdown: CancellationToken,
) {
    loop {
        let candidate = tokio::select! {
            _ = shutdown.cancelled() => break,
            candidate = queue.recv() => match candidate {
                Some(candidate) => candidate,
                None => break,
            },
        };

        let address = candidate.address.clone();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            outcome = manager.check_and_add(candidate) => match outcome {
                Ok(AddOutcome::Added) => info!(worker = id, proxy = %address, "New proxy added"),
                Ok(_) => {}
                Err(e) => warn!(worker = id, proxy = %address, error = %e, "Failed to store candidate"),
            },
        }
    }

    debug!(worker = id, "Validation worker stopped");
}
