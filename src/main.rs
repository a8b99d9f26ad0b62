//! Checkout Guard service binary.
//!
//! Serves payment webhook ingress, health and the admin API, with the
//! security and maintenance tasks running in the background.

use clap::Parser;
use std::path::PathBuf;

use checkout_guard::config::{load_config, resolve_config_path, GuardConfig};
use checkout_guard::lifecycle::startup;
use checkout_guard::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "checkout-guard")]
#[command(version, about = "Fault tolerance and abuse protection for checkout and payment flows", long_about = None)]
struct Args {
    /// Path to the TOML configuration file (falls back to CHECKOUT_GUARD_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!("checkout-guard v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        config_file = ?config_path,
        bind_address = %config.listener.bind_address,
        admin_enabled = config.admin.enabled,
        metrics_enabled = config.observability.metrics_enabled,
        "Configuration loaded"
    );

    startup::run(config, config_path, None).await
}
