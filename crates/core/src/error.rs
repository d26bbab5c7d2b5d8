use thiserror::Error;

/// Error taxonomy for the job queue, store, and URL normalizer.
///
/// Crawl-local failures (fetch/extract errors) never appear here — they are
/// aggregated into a crawl run's `failed_urls` and do not propagate as
/// `WorkerError`. See `crawler::CrawlError` for those.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("source not found: {0}")]
    SourceNotFound(uuid::Uuid),

    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("duplicate job for source {source_id}: existing job is {existing_job_id}")]
    DuplicateJob {
        source_id: uuid::Uuid,
        existing_job_id: uuid::Uuid,
    },

    #[error("worker {worker_id} does not own job {job_id}")]
    NotOwner {
        job_id: uuid::Uuid,
        worker_id: String,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

impl WorkerError {
    /// Stable, machine-readable classification, mirrored across the tool-call
    /// boundary as `error.code` (see SPEC_FULL §7).
    pub fn code(&self) -> &'static str {
        match self {
            WorkerError::Database(_) => "transient_store_error",
            WorkerError::Config(_) => "config_error",
            WorkerError::SourceNotFound(_) => "source_not_found",
            WorkerError::JobNotFound(_) => "job_not_found",
            WorkerError::DuplicateJob { .. } => "duplicate_job",
            WorkerError::NotOwner { .. } => "not_owner",
            WorkerError::InvalidUrl(_) => "validation_error",
            WorkerError::Json(_) => "validation_error",
            WorkerError::Io(_) => "worker_fatal_error",
        }
    }

    /// True for errors the caller may retry by re-invoking the same
    /// operation; false for errors where retrying cannot help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Database(e) if is_transient(e))
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    ) || err
        .as_database_error()
        .map(|db| db.code().map(|c| c == "40001" || c == "40P01").unwrap_or(false))
        .unwrap_or(false)
}
