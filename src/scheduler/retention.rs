//! Retention manager for pruning old check history.

use crate::db::Store;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How often history is swept.
pub const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Manager for deleting history past the configured retention period.
pub struct RetentionManager {
    store: Arc<Store>,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the retention manager background task.
    pub async fn start(&self) {
        let (tx, mut rx) = tokio::sync::broadcast::channel(1);
        {
            let mut stop_guard = self.stop.lock().await;
            if stop_guard.is_some() {
                return;
            }
            *stop_guard = Some(tx);
        }

        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store);
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let mut stop = self.stop.lock().await;
        if let Some(tx) = stop.take() {
            let _ = tx.send(());
        }
    }
}

/// Prune history older than the configured retention. Returns the number removed.
pub fn process_retention(store: &Store) -> usize {
    let settings = match store.settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("RetentionManager: Failed to read settings: {}", e);
            return 0;
        }
    };

    match store.prune_history_older_than(settings.history_retention_days) {
        Ok(removed) => {
            if removed > 0 {
                tracing::info!(
                    "RetentionManager: Pruned {} history entries older than {} days",
                    removed,
                    settings.history_retention_days
                );
            }
            removed
        }
        Err(e) => {
            tracing::error!("RetentionManager: Failed to prune history: {}", e);
            0
        }
    }
}
