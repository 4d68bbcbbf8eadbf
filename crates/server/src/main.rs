// crates/server/src/main.rs
//! claude-relay server binary.

use anyhow::{Context, Result};
use clap::Parser;
use claude_relay_server::{create_app, AppState, Config};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Quiet by default; RUST_LOG=claude_relay_core=debug etc. for detail.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).compact().init();

    let config = Config::parse();
    let claude_home = config
        .resolve_claude_home()
        .context("could not determine Claude home directory")?;

    let state = AppState::new(&claude_home, config.heartbeat_interval());

    // Warm the file cache so the first list request is fast.
    let warm = state.history.clone();
    tokio::spawn(async move {
        if let Err(e) = warm.chains().await {
            tracing::warn!(error = %e, "Initial history scan failed");
        }
    });

    let app = create_app(state.clone());
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    eprintln!("\n  claude-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  history: {}", claude_home.display());
    eprintln!("  \u{2192} http://{}\n", addr);
    tracing::info!(%addr, claude_home = %claude_home.display(), "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.hub.disconnect_all();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
