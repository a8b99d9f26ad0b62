//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated [`GuardConfig`]
//! - Wire alerting into the breaker registry
//! - Start background tasks (maintenance, config reload, signals)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)
//! - Downstream clients (gateway, inventory, shipping, tax) are supplied by
//!   the embedding application; without them the guard still serves webhook
//!   ingress, security and admin, and events are acknowledged only

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::checkout::{CheckoutDependencies, CheckoutGuards, CheckoutResilienceService};
use crate::checkout::service::{INVENTORY, SHIPPING, TAX};
use crate::clock::{SharedClock, SystemClock};
use crate::config::schema::GuardConfig;
use crate::config::watcher::{apply_reloads, ConfigWatcher};
use crate::http::HttpServer;
use crate::lifecycle::maintenance::run_maintenance;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{handle_signals, ReloadTarget};
use crate::observability::alerts::AlertSink;
use crate::payments::service::PAYMENT_GATEWAY;
use crate::payments::{PaymentEventHandler, PaymentGateway, PaymentResilienceService};
use crate::resilience::{CircuitBreakerManager, ConfigError, DependencyGuard, FallbackManager, RetryConfig};
use crate::security::{
    BruteForceProtectionService, RateLimiterService, ReplayAttackProtectionService, RequestValidationService,
};
use crate::webhooks::{AcknowledgeOnly, SharedWebhookHandler, WebhookHandlerService};

/// Downstream clients supplied by the embedding application.
pub struct Downstreams {
    pub gateway: Arc<dyn PaymentGateway>,
    pub checkout: CheckoutDependencies,
}

/// Every live service, shared by the HTTP handlers, admin API and background tasks.
pub struct GuardServices {
    pub config: GuardConfig,
    pub clock: SharedClock,
    pub started_at_ms: u64,
    pub breakers: Arc<CircuitBreakerManager>,
    pub fallbacks: Arc<FallbackManager>,
    pub rate_limiter: Arc<RateLimiterService>,
    pub brute_force: Arc<BruteForceProtectionService>,
    pub replay: Arc<ReplayAttackProtectionService>,
    pub validator: RequestValidationService,
    pub webhooks: Arc<WebhookHandlerService>,
    pub webhook_handler: SharedWebhookHandler,
    pub payments: Option<Arc<PaymentResilienceService>>,
    pub checkout: Option<Arc<CheckoutResilienceService>>,
}

impl GuardServices {
    /// Build all services on the system clock.
    pub fn build(config: GuardConfig, downstreams: Option<Downstreams>) -> Result<Self, ConfigError> {
        Self::build_with_clock(config, downstreams, SystemClock::shared())
    }

    pub fn build_with_clock(
        config: GuardConfig,
        downstreams: Option<Downstreams>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        let alerts = AlertSink::from_config(&config.alerts);
        let breakers = Arc::new(
            CircuitBreakerManager::new(config.circuit_breaker.defaults())?
                .with_clock(clock.clone())
                .with_state_change_hook(alerts.into_hook(clock.clone())),
        );
        let fallbacks = Arc::new(FallbackManager::new().with_clock(clock.clone()));

        let rate_limiter = Arc::new(RateLimiterService::new(config.rate_limits.clone()).with_clock(clock.clone()));
        let brute_force =
            Arc::new(BruteForceProtectionService::new(config.brute_force.clone())?.with_clock(clock.clone()));
        let replay = Arc::new(ReplayAttackProtectionService::new(config.replay.clone())?.with_clock(clock.clone()));
        let validator = RequestValidationService::new(config.validation);
        let webhooks = Arc::new(WebhookHandlerService::new(config.webhooks.clone())?.with_clock(clock.clone()));

        let mut payments = None;
        let mut checkout = None;
        let mut webhook_handler: SharedWebhookHandler = Arc::new(AcknowledgeOnly);

        if let Some(downstreams) = downstreams {
            let settings = &config.checkout;
            let guard = |name: &str, retry: RetryConfig, timeout_ms: u64| {
                DependencyGuard::new(
                    &breakers,
                    name,
                    config.circuit_breaker.for_dependency(name),
                    retry,
                    Duration::from_millis(timeout_ms),
                )
            };

            let payment_service = Arc::new(PaymentResilienceService::new(
                downstreams.gateway,
                guard(PAYMENT_GATEWAY, config.retries.payment, settings.payment_timeout_ms)?,
            ));
            let guards = CheckoutGuards {
                inventory: guard(INVENTORY, config.retries.inventory, settings.call_timeout_ms)?,
                shipping: guard(SHIPPING, config.retries.shipping, settings.call_timeout_ms)?,
                tax: guard(TAX, config.retries.tax, settings.call_timeout_ms)?,
            };
            checkout = Some(Arc::new(CheckoutResilienceService::new(
                downstreams.checkout,
                guards,
                fallbacks.clone(),
                settings.clone(),
            )));
            webhook_handler = Arc::new(PaymentEventHandler::new(payment_service.clone()));
            payments = Some(payment_service);
        } else {
            tracing::info!("No downstream clients configured; webhook events will be acknowledged only");
        }

        Ok(Self {
            started_at_ms: clock.now_ms(),
            config,
            clock,
            breakers,
            fallbacks,
            rate_limiter,
            brute_force,
            replay,
            validator,
            webhooks,
            webhook_handler,
            payments,
            checkout,
        })
    }
}

/// Run the guard until a shutdown signal arrives.
pub async fn run(
    config: GuardConfig,
    config_path: Option<PathBuf>,
    downstreams: Option<Downstreams>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        crate::observability::metrics::init_metrics(addr);
    }

    let services = Arc::new(GuardServices::build(config, downstreams)?);
    let shutdown = Shutdown::new();

    tokio::spawn(run_maintenance(services.clone(), shutdown.subscribe()));

    // The watcher handle must outlive the server.
    let mut _watcher = None;
    let mut reload = None;
    if let Some(path) = config_path {
        let (watcher, updates) = ConfigWatcher::new(&path);
        match watcher.run() {
            Ok(handle) => _watcher = Some(handle),
            Err(e) => tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled"),
        }
        let (sighup_tx, sighup_rx) = tokio::sync::mpsc::unbounded_channel();
        reload = Some(ReloadTarget {
            path,
            updates: sighup_tx,
        });
        tokio::spawn(apply_reloads(updates, services.rate_limiter.clone(), shutdown.token()));
        tokio::spawn(apply_reloads(sighup_rx, services.rate_limiter.clone(), shutdown.token()));
    }
    tokio::spawn(handle_signals(shutdown.clone(), reload));

    let admin = if services.config.admin.enabled {
        let listener = TcpListener::bind(&services.config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = crate::admin::setup_admin_router(services.clone());
        let token = shutdown.token();
        Some(tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }))
    } else {
        None
    };

    let listener = TcpListener::bind(&services.config.listener.bind_address).await?;
    let server = HttpServer::new(services.clone());
    server.run(listener, shutdown.clone()).await?;

    if let Some(admin) = admin {
        admin.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
