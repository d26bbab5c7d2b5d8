use core::database::create_pool;
use core::job_queue::JobQueue;
use core::{Store, WorkerConfig};
use crawler::bootstrap::BootstrapScheduler;
use crawler::worker::Worker;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional JSON-lines file sink alongside the human-readable stderr
    // layer, enabled by setting LOG_FILE_DIR (SPEC_FULL §4.9). The guard
    // must stay alive for the process lifetime or the background writer
    // thread is dropped and buffered lines are lost.
    let _log_file_guard = match std::env::var("LOG_FILE_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "crawler-worker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "crawler=info".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "crawler=info".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    };

    let config = WorkerConfig::from_env().map_err(|e| {
        error!(error = %e, "failed to load configuration");
        e
    })?;

    let worker_id = config
        .worker_id
        .clone()
        .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

    std::fs::create_dir_all(&config.data_dir)?;

    let pool = create_pool(&config.database).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let store = Store::new(pool.clone());
    let queue = JobQueue::new(pool);

    let shutdown = CancellationToken::new();
    install_signal_handler(shutdown.clone());

    let bootstrap = BootstrapScheduler::new(
        store.clone(),
        queue.clone(),
        std::time::Duration::from_secs(config.bootstrap_interval_secs),
        config.lock_timeout_secs,
        shutdown.clone(),
    );
    let bootstrap_handle = tokio::spawn(async move { bootstrap.run().await });

    let mut worker = Worker::new(worker_id, config, queue, store, shutdown);
    worker.run().await;

    bootstrap_handle.abort();
    info!("crawler worker exited cleanly");
    Ok(())
}

fn install_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
        shutdown.cancel();
    });
}
