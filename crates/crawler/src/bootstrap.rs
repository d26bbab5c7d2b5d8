//! Periodic scheduler that enqueues jobs for sources that have never been
//! scraped. See SPEC_FULL §4.7.

use core::job_queue::JobQueue;
use core::models::JobParams;
use core::{Store, WorkerError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct BootstrapScheduler {
    store: Store,
    queue: JobQueue,
    interval: Duration,
    lock_timeout_secs: i64,
    shutdown: CancellationToken,
}

impl BootstrapScheduler {
    pub fn new(
        store: Store,
        queue: JobQueue,
        interval: Duration,
        lock_timeout_secs: i64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            interval,
            lock_timeout_secs,
            shutdown,
        }
    }

    pub async fn run(&self) {
        info!("bootstrap scheduler starting");
        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "bootstrap tick failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
        info!("bootstrap scheduler shutting down");
    }

    async fn tick(&self) -> Result<(), WorkerError> {
        let sources = self.store.unscraped_active_sources().await?;
        for source in sources {
            let params = JobParams::from_source(&source, false);
            match self.queue.enqueue(source.id, &params, self.lock_timeout_secs).await {
                Ok(job_id) => {
                    info!(source_id = %source.id, job_id = %job_id, "bootstrap enqueued job");
                }
                Err(WorkerError::DuplicateJob { .. }) => {
                    // A job for this source already exists; nothing to do.
                }
                Err(e) => {
                    warn!(source_id = %source.id, error = %e, "bootstrap enqueue failed");
                }
            }
        }
        Ok(())
    }
}
