//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define guard metrics (breaker transitions, retries, fallbacks, security rejections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `guard_circuit_transitions_total` (counter): by circuit, from, to
//! - `guard_circuit_rejections_total` (counter): calls short-circuited by an open breaker
//! - `guard_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `guard_retry_attempts_total` (counter): retries scheduled after a transient failure
//! - `guard_fallback_total` (counter): degraded results by handler and source
//! - `guard_rate_limited_total` (counter): rejected requests by preset
//! - `guard_failed_logins_total`, `guard_account_lockouts_total`, `guard_blocked_ip_attempts_total`
//! - `guard_replay_rejections_total` (counter): by reason
//! - `guard_validation_rejections_total` (counter): by rule
//! - `guard_webhook_events_total` (counter): by outcome
//! - `guard_webhook_retry_queue` / `guard_webhook_ledger_size` (gauges)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed recorder
//!   every call is a no-op, so library users and tests pay nothing
//! - Labels are low-cardinality (names, presets, reasons), never identifiers

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            register_metrics();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

fn register_metrics() {
    describe_counter!("guard_circuit_transitions_total", "Circuit breaker state transitions");
    describe_counter!("guard_circuit_rejections_total", "Calls rejected by an open circuit");
    describe_gauge!("guard_circuit_state", "Circuit state (0=closed, 1=half-open, 2=open)");
    describe_counter!("guard_retry_attempts_total", "Retries scheduled after transient failures");
    describe_counter!("guard_fallback_total", "Results served by a degradation tier");
    describe_counter!("guard_rate_limited_total", "Requests rejected by the rate limiter");
    describe_counter!("guard_failed_logins_total", "Failed login attempts recorded");
    describe_counter!("guard_account_lockouts_total", "Accounts locked after repeated failures");
    describe_counter!("guard_blocked_ip_attempts_total", "Login attempts from blocked IPs");
    describe_counter!("guard_replay_rejections_total", "Requests rejected as replays or duplicates");
    describe_counter!("guard_validation_rejections_total", "Payloads rejected by request validation");
    describe_counter!("guard_webhook_events_total", "Inbound webhook events by outcome");
    describe_gauge!("guard_webhook_retry_queue", "Webhook events waiting for retry");
    describe_gauge!("guard_webhook_ledger_size", "Processed webhook events retained for idempotency");
}

pub fn record_circuit_transition(name: &str, from: &'static str, to: &'static str, state_code: f64) {
    counter!(
        "guard_circuit_transitions_total",
        "circuit" => name.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
    gauge!("guard_circuit_state", "circuit" => name.to_string()).set(state_code);
}

pub fn record_circuit_rejection(name: &str) {
    counter!("guard_circuit_rejections_total", "circuit" => name.to_string()).increment(1);
}

pub fn record_retry_attempt(operation: &str) {
    counter!("guard_retry_attempts_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_fallback(handler: &str, source: &'static str) {
    counter!(
        "guard_fallback_total",
        "handler" => handler.to_string(),
        "source" => source
    )
    .increment(1);
}

pub fn record_rate_limited(preset: &str) {
    counter!("guard_rate_limited_total", "preset" => preset.to_string()).increment(1);
}

pub fn record_failed_login() {
    counter!("guard_failed_logins_total").increment(1);
}

pub fn record_account_lockout() {
    counter!("guard_account_lockouts_total").increment(1);
}

pub fn record_blocked_ip_attempt() {
    counter!("guard_blocked_ip_attempts_total").increment(1);
}

pub fn record_replay_rejection(reason: &'static str) {
    counter!("guard_replay_rejections_total", "reason" => reason).increment(1);
}

pub fn record_validation_rejection(rule: &'static str) {
    counter!("guard_validation_rejections_total", "rule" => rule).increment(1);
}

pub fn record_webhook_event(outcome: &'static str) {
    counter!("guard_webhook_events_total", "outcome" => outcome).increment(1);
}

pub fn record_webhook_queue_sizes(retry_queue: usize, ledger: usize) {
    gauge!("guard_webhook_retry_queue").set(retry_queue as f64);
    gauge!("guard_webhook_ledger_size").set(ledger as f64);
}
