//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//! - Trigger appropriate actions (shutdown, reload)
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second SIGTERM/SIGINT forces exit
//! - SIGHUP triggers config reload, not shutdown

use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;
use crate::lifecycle::shutdown::Shutdown;

/// Where a SIGHUP-triggered reload is read from and delivered to.
pub struct ReloadTarget {
    pub path: PathBuf,
    pub updates: mpsc::UnboundedSender<GuardConfig>,
}

impl ReloadTarget {
    fn reload(&self) {
        match load_config(&self.path) {
            Ok(config) => {
                tracing::info!(path = ?self.path, "Configuration reloaded on SIGHUP");
                let _ = self.updates.send(config);
            }
            Err(e) => tracing::error!("Failed to reload config: {}. Keeping current configuration.", e),
        }
    }
}

/// Run until the process is told to stop, then trigger `shutdown`.
///
/// Keeps listening afterwards so a second interrupt exits immediately.
pub async fn handle_signals(shutdown: Shutdown, reload: Option<ReloadTarget>) {
    wait_for_termination(reload.as_ref()).await;
    tracing::info!("Shutdown signal received");
    shutdown.trigger();

    wait_for_termination(None).await;
    tracing::warn!("Second shutdown signal received, forcing exit");
    std::process::exit(1);
}

#[cfg(unix)]
async fn wait_for_termination(reload: Option<&ReloadTarget>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hangup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hangup)) => (term, hangup),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Unix signal handlers unavailable, falling back to Ctrl+C only");
            ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = ctrl_c() => return,
            _ = term.recv() => return,
            _ = hangup.recv() => match reload {
                Some(target) => target.reload(),
                None => tracing::info!("SIGHUP ignored, no config file in use"),
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination(_reload: Option<&ReloadTarget>) {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
