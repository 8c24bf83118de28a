use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use melodia_artifacts::StoreConfig;
use melodia_core::queue::JobQueue;
use melodia_worker::{ArtifactCache, GeneratorConfig, HttpGenerator, WorkerConfig, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired leases are swept back to pending.
const REAP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "melodia_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    let store_config = StoreConfig::from_env().context("Invalid artifact store configuration")?;
    let generator_config = GeneratorConfig::from_env().context("Invalid generator configuration")?;
    tracing::info!(
        worker_id = %config.worker_id,
        concurrency = config.concurrency,
        lease_secs = config.lease_duration.as_secs(),
        "Loaded worker configuration",
    );

    // --- Queue ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = melodia_db::create_pool(&database_url, config.concurrency as u32 * 2 + 2)
        .await
        .context("Failed to connect to database")?;
    melodia_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    let queue: Arc<dyn JobQueue> = Arc::new(melodia_db::PgJobQueue::new(pool));
    tracing::info!("Job queue connected");

    // --- Artifacts ---
    let store = melodia_artifacts::open_store(&store_config)
        .await
        .context("Failed to open artifact store")?;
    let cache = ArtifactCache::open(config.cache_dir.clone())
        .await
        .context("Failed to open artifact cache")?;

    // --- Generator ---
    let generator = Arc::new(HttpGenerator::new(generator_config)?);

    // --- Run ---
    let shutdown = CancellationToken::new();
    let reaper = tokio::spawn(melodia_worker::reaper::run(
        Arc::clone(&queue),
        REAP_INTERVAL,
        shutdown.clone(),
    ));
    let workers = WorkerPool::new(config, queue, store, generator, cache);
    let pool_handle = tokio::spawn(workers.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    pool_handle.await.context("Worker pool task panicked")?;
    let _ = reaper.await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
