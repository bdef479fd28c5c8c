//! `midterm-server`: the process-wide singleton serving the REST surface,
//! the Mux Channel, and the State/Settings Channel over one axum app.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use midterm_server::config::{Cli, ServerConfig};
use midterm_server::hub::BroadcastHub;
use midterm_server::manager::SessionManager;
use midterm_server::settings::SettingsStore;
use midterm_server::{router, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = ServerConfig::from_cli(cli);
    let bind_address: SocketAddr = cfg.bind_address.parse()?;

    let hub = Arc::new(BroadcastHub::new());
    let manager = SessionManager::new(Arc::clone(&hub), &cfg);
    let settings = Arc::new(SettingsStore::default());

    let state = AppState {
        manager: Arc::clone(&manager),
        hub,
        settings,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(%bind_address, "midterm-server listening");

    let shutdown_manager = Arc::clone(&manager);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received, draining sessions");
            shutdown_manager.shutdown_all().await;
        })
        .await?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(windows)]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
