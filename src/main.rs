use anyhow::Result;
use fleetwatch::*;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = config::ControllerConfig::load()?;
    let backend = storage::Backend::open(&config.storage).await?;

    let downlinks = Arc::new(ingest::DownlinkRegistry::new());
    let stats = Arc::new(ingest::IngestStats::default());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let stats_handle = ingest::spawn_stats_logger(
        stats.clone(),
        backend.store(),
        Duration::from_secs(config.monitoring.stats_log_interval_secs),
        shutdown_rx,
    );

    let app = routes::app(
        backend.store(),
        downlinks,
        stats,
        config.storage.history_cap,
    );
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(version = version::VERSION, "Listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(logging::shutdown_signal())
        .await;
    tracing::info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    let _ = stats_handle.await;
    backend.close().await;
    served?;
    Ok(())
}
