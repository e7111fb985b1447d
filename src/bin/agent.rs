use anyhow::Result;
use fleetwatch::*;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = config::AgentConfig::load()?;
    tracing::info!(
        node_id = %config.agent.node_id,
        controller = %config.agent.controller_url,
        targets = config.prober.targets.len(),
        "Starting agent"
    );

    let prober = Arc::new(prober::Prober::new(config.prober.targets.clone()));
    let mut client = transport::StreamClient::new(
        config.agent.controller_url.clone(),
        Duration::from_millis(config.agent.connect_timeout_ms),
        prober.clone(),
    );
    // Not fatal: the reporter reconnects at the start of each cycle.
    if let Err(e) = client.connect().await {
        tracing::warn!(error = %e, "initial connect to controller failed");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = agent::spawn(
        agent::AgentDeps {
            sampler: Arc::new(sampler::SysinfoSampler::new()),
            window: Arc::new(window::AggregationWindow::new(config.agent.node_id.clone())),
            prober,
            client,
            stats: Arc::new(agent::AgentStats::default()),
            shutdown_rx,
        },
        agent::AgentTiming::from_config(&config),
    );

    logging::shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
    Ok(())
}
