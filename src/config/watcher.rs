//! Configuration file watcher for hot reload.
//!
//! Only the rate-limit rules are applied live; every other section is read
//! once at startup. A file that fails to load or validate is logged and
//! ignored, so the running rules stay in force.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;
use crate::security::RateLimiterService;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!("Failed to reload config: {}. Keeping current configuration.", e);
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply reloaded rate-limit rules until shutdown or the watcher goes away.
pub async fn apply_reloads(
    mut updates: mpsc::UnboundedReceiver<GuardConfig>,
    limiter: Arc<RateLimiterService>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            update = updates.recv() => match update {
                Some(config) => limiter.reload_rules(config.rate_limits),
                None => break,
            },
        }
    }
    tracing::debug!("Config reload task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{RateLimitRule, RateLimitRules};

    #[tokio::test]
    async fn test_reload_swaps_rules() {
        let limiter = Arc::new(RateLimiterService::new(RateLimitRules::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(apply_reloads(rx, limiter.clone(), shutdown.clone()));

        let mut config = GuardConfig::default();
        config.rate_limits.checkout = RateLimitRule::new(60_000, 3);
        tx.send(config).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(limiter.rules().checkout.max_requests, 3);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let limiter = Arc::new(RateLimiterService::new(RateLimitRules::default()));
        let (_tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(apply_reloads(rx, limiter, shutdown.clone()));

        shutdown.cancel();
        task.await.unwrap();
    }
}
