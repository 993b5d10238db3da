use std::sync::Arc;

use anyhow::Context;
use carlitos_pipeline::config::{ExtractorConfig, StorageConfig};
use carlitos_pipeline::decoder::FfmpegDecoder;
use carlitos_pipeline::detector::HttpPoseDetectorProvider;
use carlitos_pipeline::extractor::LandmarkExtractor;
use carlitos_pipeline::job::AnalysisJobRunner;
use carlitos_pipeline::postgres::{PgAnalysisStore, PgJobQueue};
use carlitos_pipeline::storage::{self, VideoStorage};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carlitos_worker::config::WorkerConfig;
use carlitos_worker::pool::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carlitos_worker=debug,carlitos_pipeline=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    let storage_config = StorageConfig::from_env()?;
    let extractor_config = ExtractorConfig::from_env();
    tracing::info!(
        concurrency = config.concurrency,
        max_attempts = config.analysis.retry.max_attempts,
        lease_secs = config.analysis.lease.as_secs(),
        pose_service = %extractor_config.pose_service_url,
        "Loaded worker configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = carlitos_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    carlitos_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Pipeline ---
    let storage: Arc<dyn VideoStorage> = Arc::from(storage::from_config(&storage_config).await);
    let extractor = Arc::new(LandmarkExtractor::new(
        storage,
        Arc::new(FfmpegDecoder::new(extractor_config.ffmpeg)),
        Arc::new(HttpPoseDetectorProvider::new(extractor_config.pose_service_url)),
    ));
    let runner = Arc::new(AnalysisJobRunner::new(
        Arc::new(PgAnalysisStore::new(pool.clone())),
        extractor,
        config.analysis.retry,
        config.analysis.lease,
    ));
    let workers = WorkerPool::new(Arc::new(PgJobQueue::new(pool)), runner, config);

    // --- Run until signalled ---
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { workers.run(cancel).await }
    });

    shutdown_signal().await;
    cancel.cancel();
    tracing::info!("Waiting for running analyses to finish");
    handle.await.context("Worker pool task panicked")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
