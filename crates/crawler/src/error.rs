//! Crawl-local error taxonomy. Kept separate from `core::WorkerError` because
//! these failures are per-URL and get aggregated into a job's `failed_urls`
//! rather than propagated out of a crawl run (SPEC_FULL §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to extract content from {url}: {reason}")]
    Extract { url: String, reason: String },

    #[error("worker fatal error: {0}")]
    WorkerFatal(String),
}

impl CrawlError {
    pub fn code(&self) -> &'static str {
        match self {
            CrawlError::Fetch { .. } => "fetch_error",
            CrawlError::Extract { .. } => "extract_error",
            CrawlError::WorkerFatal(_) => "worker_fatal_error",
        }
    }
}
