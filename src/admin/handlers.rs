use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::http::server::AppState;
use crate::resilience::fallback::FallbackStatus;
use crate::resilience::{CircuitSnapshot, CircuitState};
use crate::security::brute_force::{BlockedIp, LockedAccount};
use crate::security::masking::{mask_identifier, mask_ip};
use crate::security::RateLimitRules;
use crate::webhooks::RetryQueueItem;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_ms: u64,
    pub downstreams_configured: bool,
    pub open_circuits: usize,
    pub locked_accounts: usize,
    pub blocked_ips: usize,
    pub rate_limit_windows: usize,
    pub tracked_nonces: usize,
    pub webhooks_processed: usize,
    pub webhook_retry_queue: usize,
}

#[derive(Serialize)]
pub struct Lockouts {
    pub accounts: Vec<LockedAccount>,
    pub ips: Vec<BlockedIp>,
}

#[derive(Serialize)]
pub struct ActionResult {
    pub action: &'static str,
    pub target: String,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let services = &state.services;
    let open_circuits = services
        .breakers
        .snapshots()
        .iter()
        .filter(|s| s.state == CircuitState::Open)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if open_circuits == 0 { "operational" } else { "degraded" },
        uptime_ms: services.clock.now_ms().saturating_sub(services.started_at_ms),
        downstreams_configured: services.payments.is_some(),
        open_circuits,
        locked_accounts: services.brute_force.locked_accounts().len(),
        blocked_ips: services.brute_force.blocked_ips().len(),
        rate_limit_windows: services.rate_limiter.tracked_windows(),
        tracked_nonces: services.replay.tracked_nonces(),
        webhooks_processed: services.webhooks.processed_count(),
        webhook_retry_queue: services.webhooks.retry_queue().len(),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.services.breakers.snapshots())
}

pub async fn reset_circuit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ActionResult>, StatusCode> {
    if !state.services.breakers.reset(&name) {
        return Err(StatusCode::NOT_FOUND);
    }
    tracing::info!(circuit = %name, "Circuit reset by admin");
    Ok(Json(ActionResult {
        action: "circuit_reset",
        target: name,
    }))
}

pub async fn get_fallbacks(State(state): State<AppState>) -> Json<Vec<FallbackStatus>> {
    Json(state.services.fallbacks.statuses())
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitRules> {
    Json(state.services.rate_limiter.rules().as_ref().clone())
}

pub async fn get_lockouts(State(state): State<AppState>) -> Json<Lockouts> {
    let brute_force = &state.services.brute_force;
    Json(Lockouts {
        accounts: brute_force.locked_accounts(),
        ips: brute_force.blocked_ips(),
    })
}

pub async fn unlock_account(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<ActionResult>, StatusCode> {
    if !state.services.brute_force.unlock_account(&identifier) {
        return Err(StatusCode::NOT_FOUND);
    }
    let target = mask_identifier(&identifier);
    tracing::info!(identifier = %target, "Account unlocked by admin");
    Ok(Json(ActionResult {
        action: "account_unlocked",
        target,
    }))
}

pub async fn unblock_ip(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<ActionResult>, StatusCode> {
    if !state.services.brute_force.unblock_ip(&ip) {
        return Err(StatusCode::NOT_FOUND);
    }
    let target = mask_ip(&ip);
    tracing::info!(ip = %target, "IP unblocked by admin");
    Ok(Json(ActionResult {
        action: "ip_unblocked",
        target,
    }))
}

pub async fn get_retry_queue(State(state): State<AppState>) -> Json<Vec<RetryQueueItem>> {
    Json(state.services.webhooks.retry_queue())
}
