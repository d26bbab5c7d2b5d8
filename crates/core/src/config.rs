use crate::WorkerError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Process-environment-derived configuration, loaded once at worker startup
/// (SPEC_FULL §4.8). Nothing here is re-read after `from_env` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub database: DatabaseConfig,
    pub worker_id: Option<String>,
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub browser_idle_timeout_secs: u64,
    pub lock_timeout_secs: i64,
    pub bootstrap_interval_secs: u64,
    pub job_retention_days: i64,
    pub max_pages_per_run: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerError> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .map_err(|_| WorkerError::Config("DATABASE_URL is required".to_string()))?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .unwrap_or(1),
                connect_timeout: env::var("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                idle_timeout: env::var("DATABASE_IDLE_TIMEOUT")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .unwrap_or(600),
            },
            worker_id: env::var("WORKER_ID").ok(),
            data_dir: env::var("WORKER_DATA_DIR")
                .unwrap_or_else(|_| "./data/worker".to_string())
                .into(),
            poll_interval_secs: env::var("WORKER_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            heartbeat_interval_secs: env::var("WORKER_HEARTBEAT_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            browser_idle_timeout_secs: env::var("WORKER_BROWSER_IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            lock_timeout_secs: env::var("WORKER_LOCK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            bootstrap_interval_secs: env::var("BOOTSTRAP_INTERVAL_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .unwrap_or(1800),
            job_retention_days: env::var("JOB_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .unwrap_or(7),
            max_pages_per_run: env::var("WORKER_MAX_PAGES_PER_RUN")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        })
    }
}
