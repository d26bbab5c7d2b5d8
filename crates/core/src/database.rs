use crate::{DatabaseConfig, WorkerError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, WorkerError> {
    info!("connecting to PostgreSQL database");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .test_before_acquire(true)
        .connect(&config.url)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to connect to PostgreSQL database");
            WorkerError::Database(e)
        })?;

    info!("PostgreSQL connection pool created");
    Ok(pool)
}
