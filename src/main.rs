//! deskd — multi-tenant access control and state sync for height-
//! adjustable desks.
//!
//! Startup order matters: the store loads (seeding the guest admin on
//! first run) and persists its seeded state before the gateway accepts
//! traffic, so a crash right after boot never loses the seed. The
//! config watcher and device sync engine are restartable tasks; admin
//! commands bounce them when their periods change at runtime.

mod auth;
mod config;
mod error;
mod gateway;
mod model;
mod store;
mod sync;

use crate::gateway::AppState;
use crate::store::storage::FsStorage;
use crate::store::watcher::ConfigWatcher;
use crate::store::Store;
use crate::sync::DeviceSyncEngine;
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "deskd", about = "Access control and sync service for adjustable desks")]
struct Args {
    /// Directory holding users.json, tables.json and config.json.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Address the HTTP gateway binds to.
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskd=info".into()),
        )
        .init();

    let storage = FsStorage::new(&args.data_dir)
        .with_context(|| format!("failed to open data dir {}", args.data_dir.display()))?;
    let store = Store::load(storage).context("failed to load persisted state")?;
    // Persist the seeded state up front so first-run credentials survive
    // an immediate crash.
    store.save_all_blocking();

    let watcher = ConfigWatcher::new();
    watcher.restart(&store);

    let engine = DeviceSyncEngine::new(Arc::clone(&store));
    engine.restart();

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        watcher: Arc::clone(&watcher),
        engine: Arc::clone(&engine),
    });

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "gateway listening");

    axum::serve(listener, gateway::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server failed")?;

    info!("shutting down");
    watcher.stop();
    engine.stop();
    store.save_all_blocking();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
