//! Worker main loop: poll, lease, crawl, complete/fail, repeat. See
//! SPEC_FULL §4.6.

use crate::browser_session::BrowserSession;
use crate::crawl_engine::CrawlEngine;
use crate::domain_coordinator::DomainCoordinator;
use core::job_queue::JobQueue;
use core::models::CrawlResultSummary;
use core::{SourceStatus, Store, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How often the idle poll loop reclaims expired leases from other workers.
const RELEASE_EXPIRED_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

pub struct Worker {
    worker_id: String,
    config: WorkerConfig,
    queue: JobQueue,
    store: Store,
    coordinator: DomainCoordinator,
    browser: BrowserSession,
    shutdown: CancellationToken,
    last_release_expired: tokio::time::Instant,
}

impl Worker {
    pub fn new(
        worker_id: String,
        config: WorkerConfig,
        queue: JobQueue,
        store: Store,
        shutdown: CancellationToken,
    ) -> Self {
        let idle_timeout = std::time::Duration::from_secs(config.browser_idle_timeout_secs);
        let data_dir = config.data_dir.join(&worker_id);
        Worker {
            worker_id,
            config,
            queue,
            store,
            coordinator: DomainCoordinator::new(),
            browser: BrowserSession::new(data_dir, idle_timeout),
            shutdown,
            last_release_expired: tokio::time::Instant::now(),
        }
    }

    /// Runs until `shutdown` is set. Reclaims any locks this or a prior
    /// process left behind before entering the poll loop (mirrors the
    /// original worker's startup `release_expired_locks(max_age_minutes=0)`).
    pub async fn run(&mut self) {
        info!(worker_id = %self.worker_id, "worker starting");

        if let Err(e) = self.queue.release_expired(0).await {
            warn!(error = %e, "failed to reclaim expired locks at startup");
        }

        while !self.shutdown.is_cancelled() {
            match self.queue.lease(&self.worker_id).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    self.browser.close_if_idle().await;
                    if self.last_release_expired.elapsed() >= RELEASE_EXPIRED_INTERVAL {
                        if let Err(e) = self.queue.release_expired(60).await {
                            warn!(error = %e, "failed to reclaim expired locks");
                        }
                        self.last_release_expired = tokio::time::Instant::now();
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(self.config.poll_interval_secs)) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "error polling for jobs");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }

        info!(worker_id = %self.worker_id, "worker shutting down");
        self.browser.close().await;
    }

    async fn process_job(&mut self, job: core::models::Job) {
        let job_id = job.id;
        let source_id = job.source_id;

        let params = match job.params() {
            Ok(p) => p,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "malformed job params, failing job");
                let _ = self
                    .queue
                    .fail(job_id, &self.worker_id, &format!("malformed job params: {e}"))
                    .await;
                return;
            }
        };

        info!(job_id = %job_id, source_id = %source_id, url = %params.source_url, "processing job");

        let heartbeat_handle = self.spawn_heartbeat(job_id);

        let engine = CrawlEngine::new(&self.store, &self.coordinator, self.config.max_pages_per_run);
        let outcome = engine
            .crawl(job_id, source_id, &params, &mut self.browser)
            .await;

        heartbeat_handle.abort();

        match outcome {
            Ok(outcome) => {
                let summary = CrawlResultSummary {
                    success: true,
                    pages_scraped: outcome.pages_scraped,
                    scraped_urls: outcome.scraped_urls,
                    failed_urls: outcome.failed_urls,
                    error: None,
                };
                if let Err(e) = self.queue.complete(job_id, &self.worker_id, &summary).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job completed");
                }
                if let Err(e) = self
                    .store
                    .mark_source_scraped(source_id, chrono::Utc::now())
                    .await
                {
                    warn!(source_id = %source_id, error = %e, "failed to update source last_scraped_at");
                }
                if let Err(e) = self
                    .store
                    .set_source_status(source_id, SourceStatus::Completed)
                    .await
                {
                    warn!(source_id = %source_id, error = %e, "failed to mark source completed");
                }
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "crawl failed");
                if let Err(fail_err) = self.queue.fail(job_id, &self.worker_id, &e.to_string()).await {
                    error!(job_id = %job_id, error = %fail_err, "failed to mark job failed");
                }
                if let Err(status_err) = self
                    .store
                    .set_source_status(source_id, SourceStatus::Failed)
                    .await
                {
                    warn!(source_id = %source_id, error = %status_err, "failed to mark source failed");
                }
            }
        }
    }

    /// Keeps the lease alive for the duration of a crawl; aborted once the
    /// crawl finishes. A failed heartbeat only logs — the lock-expiry path
    /// in the queue is what ultimately reclaims the job if this worker dies.
    fn spawn_heartbeat(&self, job_id: Uuid) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let worker_id = self.worker_id.clone();
        let interval = std::time::Duration::from_secs(self.config.heartbeat_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = queue.heartbeat(job_id, &worker_id).await {
                    warn!(job_id = %job_id, error = %e, "heartbeat failed");
                    break;
                }
            }
        })
    }
}
