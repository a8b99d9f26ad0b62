//! Periodic housekeeping.
//!
//! # Responsibilities
//! - Drop expired rate-limit windows, login counters, lockouts and IP blocks
//! - Drop expired nonces and duplicate-request counters
//! - Evict webhook ledger entries past retention
//! - Re-run webhook events whose retry time has arrived
//!
//! Expiry is also enforced lazily on every read, so a missed sweep only
//! costs memory, never correctness.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::startup::GuardServices;
use crate::observability::metrics;
use crate::webhooks::RetryRunReport;

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_limit_windows: usize,
    pub login_records: usize,
    pub nonces: usize,
    pub duplicate_counters: usize,
    pub webhook_events: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.rate_limit_windows + self.login_records + self.nonces + self.duplicate_counters + self.webhook_events
    }
}

/// One pass over every expiring store.
pub fn sweep_all(services: &GuardServices) -> SweepReport {
    let brute_force = services.brute_force.sweep_expired();
    let replay = services.replay.sweep_expired();
    let report = SweepReport {
        rate_limit_windows: services.rate_limiter.sweep_expired(),
        login_records: brute_force.attempts + brute_force.lockouts + brute_force.ip_blocks,
        nonces: replay.nonces,
        duplicate_counters: replay.duplicates,
        webhook_events: services.webhooks.evict_expired(),
    };
    metrics::record_webhook_queue_sizes(services.webhooks.retry_queue().len(), services.webhooks.processed_count());
    report
}

/// Run due webhook retries through the configured handler.
pub async fn run_webhook_retries(services: &GuardServices) -> RetryRunReport {
    let report = services
        .webhooks
        .process_due_retries(services.webhook_handler.as_ref())
        .await;
    if report != RetryRunReport::default() {
        tracing::info!(
            succeeded = report.succeeded,
            requeued = report.requeued,
            dropped = report.dropped,
            "Webhook retries processed"
        );
    }
    report
}

pub async fn run_maintenance(services: Arc<GuardServices>, mut shutdown: broadcast::Receiver<()>) {
    let schedule = &services.config.maintenance;
    tracing::info!(
        sweep_interval_secs = schedule.sweep_interval_secs,
        webhook_retry_interval_secs = schedule.webhook_retry_interval_secs,
        "Maintenance tasks starting"
    );

    let mut sweeps = time::interval(Duration::from_secs(schedule.sweep_interval_secs));
    let mut retries = time::interval(Duration::from_secs(schedule.webhook_retry_interval_secs));
    sweeps.set_missed_tick_behavior(MissedTickBehavior::Delay);
    retries.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sweeps.tick() => {
                let report = sweep_all(&services);
                if report.total() > 0 {
                    tracing::debug!(?report, "Expired entries swept");
                }
            }
            _ = retries.tick() => {
                run_webhook_retries(&services).await;
            }
            _ = shutdown.recv() => {
                tracing::info!("Maintenance received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::config::schema::{AlertConfig, GuardConfig};
    use crate::lifecycle::shutdown::Shutdown;

    fn services(clock: &MockClock) -> GuardServices {
        let mut config = GuardConfig::default();
        config.alerts = AlertConfig::Disabled;
        GuardServices::build_with_clock(config, None, clock.shared()).unwrap()
    }

    #[test]
    fn test_sweep_removes_expired_state() {
        let clock = MockClock::default();
        let services = services(&clock);

        services.rate_limiter.is_within_limit("203.0.113.7", crate::security::RateLimitPreset::Api);
        services.replay.validate_freshness("nonce-1", clock.now_ms());
        for _ in 0..2 {
            services.brute_force.record_failed_attempt("alice@example.com", "203.0.113.7");
        }

        assert_eq!(sweep_all(&services).total(), 0);

        clock.advance(Duration::from_secs(2 * 60 * 60));
        let report = sweep_all(&services);
        assert_eq!(report.rate_limit_windows, 1);
        assert_eq!(report.nonces, 1);
        assert_eq!(report.login_records, 1);
        assert_eq!(services.rate_limiter.tracked_windows(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_on_shutdown() {
        let clock = MockClock::default();
        let services = Arc::new(services(&clock));
        let shutdown = Shutdown::new();
        let task = tokio::spawn(run_maintenance(services, shutdown.subscribe()));

        tokio::task::yield_now().await;
        shutdown.trigger();
        task.await.unwrap();
    }
}
