mod config;
mod db;
mod format;
mod listener;
mod notify;
mod packet;
mod solar;
mod state;
mod timeparse;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use listener::Ingest;
use notify::Notifier;
use state::Store;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wx_hub=info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let explicit_path = env::var("CONFIG_PATH").ok();
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::resolve(&config_path, explicit_path.is_some(), |k| env::var(k).ok())?;
    info!(
        station = %cfg.station,
        udp_port = cfg.udp_port,
        web_port = cfg.web_port,
        units = %cfg.units,
        "config loaded"
    );

    // ── Database ────────────────────────────────────────────────────
    let db = match &cfg.db_path {
        Some(path) => {
            let db = Db::open(path).await?;
            db.migrate().await?;
            match db.count().await {
                Ok(rows) => info!(path = %path, rows, "db ready"),
                Err(e) => warn!(path = %path, "db ready, row count unavailable: {e:#}"),
            }
            Some(db)
        }
        None => {
            warn!("no db_path configured; readings will not be stored");
            None
        }
    };

    // ── Shared state ────────────────────────────────────────────────
    let store = Store::new();
    let notifier = Notifier::new();
    store
        .record(|st| st.record_system("receiver started".to_string()))
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // ── UDP listener ────────────────────────────────────────────────
    let socket = listener::bind(cfg.udp_port).await?;
    let ingest = Ingest {
        store: store.clone(),
        db: db.clone(),
        notifier: notifier.clone(),
    };
    let udp_task = tokio::spawn(listener::run(socket, ingest, shutdown_rx.clone()));

    // ── Ctrl-C ──────────────────────────────────────────────────────
    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            return;
        }
        info!("interrupt received");
        signal_tx.send_replace(true);
    });

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        config: Arc::new(cfg),
        store,
        db: db.clone(),
        notifier,
        shutdown: Arc::clone(&shutdown_tx),
    };
    let served = web::serve(app, shutdown_rx).await;

    // The web server may have failed on its own; stop the listener too.
    shutdown_tx.send_replace(true);
    if let Err(e) = udp_task.await {
        error!("udp listener task failed: {e}");
    }
    if let Some(db) = db {
        db.close().await;
    }
    info!("receiver stopped");

    served
}
