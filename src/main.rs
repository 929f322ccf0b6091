//! healthwatch - HTTP endpoint health monitoring service.
//!
//! Polls registered endpoints, classifies their responses and keeps a
//! bounded check history, served over a small JSON API.

mod clock;
mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use clock::SystemClock;
use config::ServerConfig;
use db::Store;
use probe::HttpChecker;
use scheduler::{Monitor, RetentionManager};
use web::Server;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("healthwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting healthwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    if cfg.api_token.is_none() {
        tracing::warn!("HEALTHWATCH_API_TOKEN is not set; API is open");
    }

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?.with_history_max(cfg.history_max));
    tracing::info!("Database initialized successfully");

    let settings = store.settings()?;
    let endpoints = store.list_endpoints()?;
    tracing::info!("Loaded {} endpoints", endpoints.len());

    // Create monitor
    let checker = Arc::new(HttpChecker::new(&cfg.user_agent)?);
    let monitor = Arc::new(Monitor::new(store.clone(), checker.clone(), Arc::new(SystemClock)));
    if !cfg.checks_enabled {
        tracing::warn!("Checks are disabled by configuration");
        monitor.set_enabled(false);
    }

    let notifications = tokio::spawn(log_status_changes(monitor.subscribe()));
    let settings_watch = monitor.clone().watch_settings();
    monitor
        .start(Duration::from_secs(settings.auto_refresh_interval_seconds))
        .await;

    let retention = RetentionManager::new(store.clone());
    retention.start().await;

    // Start API server
    let server = Server::new(cfg, store, monitor.clone(), checker);
    server.start(shutdown_signal()).await?;

    tracing::info!("Shutting down");
    monitor.shutdown().await;
    retention.stop().await;
    settings_watch.abort();
    notifications.abort();

    Ok(())
}

/// Presentation sink for status degradations.
async fn log_status_changes(mut rx: broadcast::Receiver<scheduler::StatusChange>) {
    loop {
        match rx.recv().await {
            Ok(change) => tracing::warn!(
                "Health check failed: {} is now {} (was {})",
                change.endpoint_name,
                change.to,
                change.from
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Dropped {} status notifications", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
