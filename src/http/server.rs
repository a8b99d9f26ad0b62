//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit, rate limit)
//! - Accept payment webhooks and hand them to the ledger
//! - Report liveness and breaker health
//! - Bind server to listener and drain on shutdown

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::request::{make_request_span, propagate_request_id_layer, set_request_id_layer, RequestIdExt};
use crate::lifecycle::{GuardServices, Shutdown};
use crate::resilience::CircuitState;
use crate::security::rate_limit::{rate_limit_middleware, RateLimitLayerState};
use crate::security::RateLimitPreset;
use crate::webhooks::{WebhookAck, SIGNATURE_HEADER};

pub const WEBHOOK_PATH: &str = "/webhooks/payments";
pub const HEALTH_PATH: &str = "/health";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<GuardServices>,
}

/// HTTP server for webhook ingress and health.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(services: Arc<GuardServices>) -> Self {
        Self {
            router: build_router(services),
        }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(services: Arc<GuardServices>) -> Router {
    let timeout = Duration::from_secs(services.config.listener.request_timeout_secs);
    let body_limit = services.config.validation.max_body_bytes;
    let webhook_limit = RateLimitLayerState {
        limiter: services.rate_limiter.clone(),
        preset: RateLimitPreset::Webhook,
    };

    Router::new()
        .route(
            WEBHOOK_PATH,
            post(payment_webhook).route_layer(middleware::from_fn_with_state(webhook_limit, rate_limit_middleware)),
        )
        .route(HEALTH_PATH, get(health))
        .with_state(AppState { services })
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
        .layer(set_request_id_layer())
}

/// Always answers 200 so the provider does not redeliver on our rejections;
/// the outcome is in the ack body.
async fn payment_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<WebhookAck> {
    let services = &state.services;

    if let Err(e) = services.validator.validate_body(&body) {
        tracing::warn!(request_id = %headers.request_id(), error = %e, "Webhook payload rejected");
        return Json(WebhookAck {
            received: false,
            event_id: None,
            error: Some(e.to_string()),
        });
    }

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let ack = services
        .webhooks
        .process(&body, signature, services.webhook_handler.as_ref())
        .await;
    Json(ack)
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    /// Breakers that are open or probing.
    pub degraded_dependencies: Vec<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let degraded: Vec<String> = state
        .services
        .breakers
        .snapshots()
        .into_iter()
        .filter(|s| s.state != CircuitState::Closed)
        .map(|s| s.name)
        .collect();

    Json(HealthReport {
        status: if degraded.is_empty() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        degraded_dependencies: degraded,
    })
}
