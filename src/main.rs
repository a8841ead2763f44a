use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use metrics_store::config::ServerConfig;
use metrics_store::{server, storage, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = ServerConfig::parse();
    info!(
        address = %cfg.address,
        store_interval = cfg.store_interval,
        restore = cfg.restore,
        file_storage_path = %cfg.file_storage_path,
        "starting metrics server"
    );

    // ── 1. Open the store ────────────────────────────────────────
    let store = storage::open(&cfg.backend())
        .await
        .context("failed to open store")?;

    // ── 2. Build shared state & router ───────────────────────────
    let state = AppState::new(store.clone(), cfg.request_timeout());
    let app = server::create_router(state);

    // ── 3. Bind & serve until a shutdown signal ──────────────────
    let listener = tokio::net::TcpListener::bind(&cfg.address)
        .await
        .with_context(|| format!("failed to bind {}", cfg.address))?;
    info!(address = %cfg.address, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // ── 4. Flush and release the store whatever happened ─────────
    if let Err(e) = store.close().await {
        error!(error = %e, "store close failed");
    }
    served.context("server exited with error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
