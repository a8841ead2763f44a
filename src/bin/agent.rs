use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use metrics_store::agent::{self, Poller, Reporter};
use metrics_store::config::AgentConfig;
use metrics_store::storage::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AgentConfig::parse();
    info!(address = %cfg.address, "starting metrics agent");

    let buffer = MemoryStore::new();
    let poller = Poller::new();
    let reporter = Reporter::new(&cfg.address, !cfg.no_compress)
        .context("failed to build http client")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    agent::run(
        &buffer,
        &poller,
        &reporter,
        cfg.poll_interval(),
        cfg.report_interval(),
        shutdown_rx,
    )
    .await;

    info!("agent stopped");
    Ok(())
}
