//! Admin API over the live guard state.
//!
//! # Data Flow
//! ```text
//! request
//!     → rate limit (api preset, per IP)
//!     → auth.rs (bearer key; failures feed brute-force protection)
//!     → POST routes only: replay protection (X-Nonce / X-Timestamp)
//!     → handlers.rs
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;
use crate::lifecycle::GuardServices;
use crate::security::rate_limit::{rate_limit_middleware, RateLimitLayerState};
use crate::security::replay::replay_protection_middleware;
use crate::security::RateLimitPreset;

pub fn setup_admin_router(services: Arc<GuardServices>) -> Router {
    let rate_limit = RateLimitLayerState {
        limiter: services.rate_limiter.clone(),
        preset: RateLimitPreset::Api,
    };
    let state = AppState {
        services: services.clone(),
    };

    let mutations = Router::new()
        .route("/admin/circuits/{name}/reset", post(reset_circuit))
        .route("/admin/accounts/{identifier}/unlock", post(unlock_account))
        .route("/admin/ips/{ip}/unblock", post(unblock_ip))
        .route_layer(middleware::from_fn_with_state(
            services.replay.clone(),
            replay_protection_middleware,
        ));

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/fallbacks", get(get_fallbacks))
        .route("/admin/rate-limits", get(get_rate_limits))
        .route("/admin/lockouts", get(get_lockouts))
        .route("/admin/webhooks/retry-queue", get(get_retry_queue))
        .merge(mutations)
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .route_layer(middleware::from_fn_with_state(rate_limit, rate_limit_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
