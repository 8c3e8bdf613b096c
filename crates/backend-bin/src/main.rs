// ============================
// crates/backend-bin/src/main.rs
// ============================
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chatwire_backend::{
    auth::TokenRegistry,
    config::Settings,
    push::{DevicePushGateway, LogPushProvider},
    storage::FlatFileStorage,
    ws_router, AppState,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Realtime chat server
#[derive(Debug, Parser)]
#[command(name = "chatwire-server", version)]
struct Args {
    /// Config file; defaults to ./chatwire.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config file
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Data directory, overriding the config file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(data_dir) = args.data_dir.clone() {
        settings.data_dir = data_dir;
    }

    init_tracing(&settings.log_level, args.json_logs);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chatwire server");

    let storage = Arc::new(
        FlatFileStorage::open(&settings.data_dir)
            .with_context(|| format!("opening data directory {}", settings.data_dir.display()))?,
    );

    let tokens = Arc::new(TokenRegistry::from_settings(&settings.auth));
    if tokens.is_empty() {
        tracing::warn!("no static tokens configured, every socket will be rejected");
    }

    let push = Arc::new(DevicePushGateway::new(storage.clone(), Arc::new(LogPushProvider)));
    let bind_addr = settings.bind_addr;
    let state = AppState::new(storage, tokens, push, settings);
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(%bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},tower_http=info")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
