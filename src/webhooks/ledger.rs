//! Webhook idempotency ledger and retry queue.
//!
//! # Data Flow
//! ```text
//! POST /webhooks/payments:
//!     → verify_webhook_signature (HMAC, timestamp tolerance)
//!     → claim event id, then is_event_processed? yes → acknowledge without reprocessing
//!     → WebhookEventHandler::handle
//!         ok  → mark_event_as_processed
//!         err → queue_event_for_retry (1m → 5m → 30m, then dropped)
//!     → WebhookAck (always HTTP 200)
//!
//! Maintenance tick:
//!     → process_due_retries
//!     → evict_expired
//! ```
//!
//! # Design Decisions
//! - An event id is claimed before its handler runs, so concurrent
//!   deliveries of the same event cannot both reach the handler
//! - The claim is released only after the outcome is in the ledger or the
//!   retry queue
//! - The ledger is bounded: past the size cap, entries older than the
//!   retention window go first, then the oldest remaining ones

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{SharedClock, SystemClock};
use crate::observability::metrics;
use crate::resilience::backoff::tiered_delay;
use crate::resilience::ConfigError;
use crate::webhooks::error::WebhookError;
use crate::webhooks::signature;

/// An inbound payment-gateway event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared signing secret. Without one, signatures are not checked.
    pub secret: Option<String>,
    pub max_processed: usize,
    pub retention_ms: u64,
    pub retry_tiers_ms: Vec<u64>,
    pub max_retries: u32,
    pub tolerance_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_processed: 10_000,
            retention_ms: 7 * 24 * 60 * 60 * 1000,
            retry_tiers_ms: vec![60_000, 5 * 60_000, 30 * 60_000],
            max_retries: 3,
            tolerance_ms: 5 * 60 * 1000,
        }
    }
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_processed == 0 {
            return Err(ConfigError::Invalid("webhooks.max_processed must be > 0".into()));
        }
        if self.retry_tiers_ms.is_empty() || self.retry_tiers_ms.contains(&0) {
            return Err(ConfigError::Invalid("webhooks.retry_tiers_ms must be non-empty and > 0".into()));
        }
        if self.tolerance_ms == 0 {
            return Err(ConfigError::Invalid("webhooks.tolerance_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Business logic behind the webhook endpoint.
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), WebhookError>;
}

/// Response body for every webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
struct ProcessedEvent {
    event: WebhookEvent,
    received_at_ms: u64,
}

#[derive(Debug, Clone)]
struct RetryEntry {
    event: WebhookEvent,
    retry_count: u32,
    next_retry_at_ms: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryQueueItem {
    pub event_id: String,
    pub event_type: String,
    pub retry_count: u32,
    pub next_retry_at_ms: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryRunReport {
    pub succeeded: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// Where a failed event went after [`WebhookHandlerService::queue_event_for_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScheduling {
    Scheduled { retry_count: u32, next_retry_at_ms: u64 },
    Dropped { retry_count: u32 },
}

pub struct WebhookHandlerService {
    config: WebhookConfig,
    processed: DashMap<String, ProcessedEvent>,
    retry_queue: DashMap<String, RetryEntry>,
    in_flight: DashMap<String, ()>,
    clock: SharedClock,
}

impl WebhookHandlerService {
    pub fn new(config: WebhookConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.secret.is_none() {
            tracing::warn!("No webhook secret configured; signatures will not be verified");
        }
        Ok(Self {
            config,
            processed: DashMap::new(),
            retry_queue: DashMap::new(),
            in_flight: DashMap::new(),
            clock: SystemClock::shared(),
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Verify the signature header and parse the event.
    pub fn verify_webhook_signature(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookEvent, WebhookError> {
        match &self.config.secret {
            Some(secret) => {
                let header = signature.ok_or(WebhookError::MissingSignature)?;
                signature::verify(
                    secret.as_bytes(),
                    header,
                    body,
                    self.clock.now_ms(),
                    self.config.tolerance_ms,
                )?;
            }
            None => {
                tracing::warn!("Webhook signature verification skipped: no secret configured");
            }
        }
        serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))
    }

    pub fn is_event_processed(&self, event_id: &str) -> bool {
        self.processed.contains_key(event_id)
    }

    pub fn mark_event_as_processed(&self, event: &WebhookEvent) {
        self.processed.insert(
            event.id.clone(),
            ProcessedEvent {
                event: event.clone(),
                received_at_ms: self.clock.now_ms(),
            },
        );
        self.retry_queue.remove(&event.id);
        if self.processed.len() > self.config.max_processed {
            self.enforce_cap();
        }
        self.publish_sizes();
    }

    /// Record a handler failure and schedule the next attempt.
    ///
    /// The event is dropped once it has failed more than `max_retries` times.
    pub fn queue_event_for_retry(&self, event: &WebhookEvent, max_retries: u32, error: Option<String>) -> RetryScheduling {
        let now = self.clock.now_ms();
        let tiers: Vec<Duration> = self.config.retry_tiers_ms.iter().map(|ms| Duration::from_millis(*ms)).collect();

        let scheduling = match self.retry_queue.entry(event.id.clone()) {
            Entry::Occupied(mut entry) => {
                let retry_count = entry.get().retry_count + 1;
                if retry_count > max_retries {
                    entry.remove();
                    RetryScheduling::Dropped { retry_count }
                } else {
                    let next = now + tiered_delay(retry_count, &tiers).as_millis() as u64;
                    let item = entry.get_mut();
                    item.retry_count = retry_count;
                    item.next_retry_at_ms = next;
                    item.last_error = error;
                    RetryScheduling::Scheduled {
                        retry_count,
                        next_retry_at_ms: next,
                    }
                }
            }
            Entry::Vacant(entry) => {
                if max_retries == 0 {
                    RetryScheduling::Dropped { retry_count: 1 }
                } else {
                    let next = now + tiered_delay(1, &tiers).as_millis() as u64;
                    entry.insert(RetryEntry {
                        event: event.clone(),
                        retry_count: 1,
                        next_retry_at_ms: next,
                        last_error: error,
                    });
                    RetryScheduling::Scheduled {
                        retry_count: 1,
                        next_retry_at_ms: next,
                    }
                }
            }
        };

        match scheduling {
            RetryScheduling::Scheduled {
                retry_count,
                next_retry_at_ms,
            } => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    retry_count,
                    retry_in_ms = next_retry_at_ms.saturating_sub(now),
                    "Webhook event queued for retry"
                );
            }
            RetryScheduling::Dropped { retry_count } => {
                metrics::record_webhook_event("dropped");
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    retry_count,
                    "Webhook event exceeded retry limit; manual intervention required"
                );
            }
        }
        self.publish_sizes();
        scheduling
    }

    /// Ids whose next retry time has arrived, earliest first.
    pub fn get_events_ready_for_retry(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut ready: Vec<(u64, String)> = self
            .retry_queue
            .iter()
            .filter(|e| e.next_retry_at_ms <= now)
            .map(|e| (e.next_retry_at_ms, e.key().clone()))
            .collect();
        ready.sort();
        ready.into_iter().map(|(_, id)| id).collect()
    }

    /// Full ingress pipeline. Never fails: the outcome is in the ack.
    pub async fn process(
        &self,
        body: &[u8],
        signature: Option<&str>,
        handler: &dyn WebhookEventHandler,
    ) -> WebhookAck {
        let event = match self.verify_webhook_signature(body, signature) {
            Ok(event) => event,
            Err(e) => {
                metrics::record_webhook_event("rejected");
                tracing::warn!(error = %e, "Webhook rejected");
                return WebhookAck {
                    received: false,
                    event_id: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let ack = |error: Option<String>| WebhookAck {
            received: true,
            event_id: Some(event.id.clone()),
            error,
        };

        // Claim first: the ledger is only authoritative while the claim is held.
        if !self.claim(&event.id) || self.release_if_processed(&event.id) {
            metrics::record_webhook_event("duplicate");
            tracing::info!(event_id = %event.id, "Webhook event already processed");
            return ack(None);
        }

        let result = handler.handle(&event).await;

        // The claim is released only once the outcome is recorded.
        let ack = match result {
            Ok(()) => {
                self.mark_event_as_processed(&event);
                metrics::record_webhook_event("processed");
                tracing::info!(event_id = %event.id, event_type = %event.event_type, "Webhook event processed");
                ack(None)
            }
            Err(e) => {
                metrics::record_webhook_event("failed");
                self.queue_event_for_retry(&event, self.config.max_retries, Some(e.to_string()));
                ack(Some(e.to_string()))
            }
        };
        self.in_flight.remove(&event.id);
        ack
    }

    /// Re-run every event whose retry time has arrived.
    pub async fn process_due_retries(&self, handler: &dyn WebhookEventHandler) -> RetryRunReport {
        let mut report = RetryRunReport::default();
        for id in self.get_events_ready_for_retry() {
            let Some(event) = self.retry_queue.get(&id).map(|e| e.event.clone()) else {
                continue;
            };
            if !self.claim(&id) {
                continue;
            }
            if self.release_if_processed(&id) {
                self.retry_queue.remove(&id);
                continue;
            }
            let result = handler.handle(&event).await;

            match result {
                Ok(()) => {
                    self.mark_event_as_processed(&event);
                    metrics::record_webhook_event("retry_succeeded");
                    report.succeeded += 1;
                }
                Err(e) => match self.queue_event_for_retry(&event, self.config.max_retries, Some(e.to_string())) {
                    RetryScheduling::Scheduled { .. } => report.requeued += 1,
                    RetryScheduling::Dropped { .. } => report.dropped += 1,
                },
            }
            self.in_flight.remove(&id);
        }
        if report != RetryRunReport::default() {
            tracing::info!(
                succeeded = report.succeeded,
                requeued = report.requeued,
                dropped = report.dropped,
                "Webhook retry pass complete"
            );
        }
        report
    }

    pub fn retry_queue(&self) -> Vec<RetryQueueItem> {
        let mut items: Vec<_> = self
            .retry_queue
            .iter()
            .map(|e| RetryQueueItem {
                event_id: e.key().clone(),
                event_type: e.event.event_type.clone(),
                retry_count: e.retry_count,
                next_retry_at_ms: e.next_retry_at_ms,
                last_error: e.last_error.clone(),
            })
            .collect();
        items.sort_by_key(|i| i.next_retry_at_ms);
        items
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Drop ledger entries older than the retention window.
    pub fn evict_expired(&self) -> usize {
        let cutoff = self.clock.now_ms().saturating_sub(self.config.retention_ms);
        let before = self.processed.len();
        self.processed.retain(|_, p| p.received_at_ms >= cutoff);
        let evicted = before.saturating_sub(self.processed.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired webhook ledger entries");
        }
        self.publish_sizes();
        evicted
    }

    fn enforce_cap(&self) {
        self.evict_expired();
        let overflow = self.processed.len().saturating_sub(self.config.max_processed);
        if overflow == 0 {
            return;
        }
        let mut by_age: Vec<(u64, String)> = self
            .processed
            .iter()
            .map(|e| (e.received_at_ms, e.key().clone()))
            .collect();
        by_age.sort();
        for (_, id) in by_age.into_iter().take(overflow) {
            self.processed.remove(&id);
        }
        tracing::debug!(evicted = overflow, "Webhook ledger over capacity; evicted oldest entries");
    }

    fn claim(&self, event_id: &str) -> bool {
        match self.in_flight.entry(event_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(());
                true
            }
        }
    }

    /// Drop a just-acquired claim when the event already completed.
    fn release_if_processed(&self, event_id: &str) -> bool {
        if !self.is_event_processed(event_id) {
            return false;
        }
        self.in_flight.remove(event_id);
        true
    }

    fn publish_sizes(&self) {
        metrics::record_webhook_queue_sizes(self.retry_queue.len(), self.processed.len());
    }
}

/// Handler that accepts every event, for deployments without business wiring.
pub struct AcknowledgeOnly;

#[async_trait]
impl WebhookEventHandler for AcknowledgeOnly {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Webhook event acknowledged");
        Ok(())
    }
}

pub type SharedWebhookHandler = Arc<dyn WebhookEventHandler>;
