//! Payment webhook consumer.
//!
//! Maps gateway event types onto payment statuses and feeds them to
//! [`PaymentResilienceService`], so degraded status lookups can answer with
//! what the gateway last told us.

use async_trait::async_trait;
use std::sync::Arc;

use crate::payments::service::PaymentResilienceService;
use crate::payments::types::PaymentStatus;
use crate::webhooks::{WebhookError, WebhookEvent, WebhookEventHandler};

pub struct PaymentEventHandler {
    payments: Arc<PaymentResilienceService>,
}

impl PaymentEventHandler {
    pub fn new(payments: Arc<PaymentResilienceService>) -> Self {
        Self { payments }
    }
}

/// Status implied by a gateway event type, if it carries one.
pub fn status_for_event(event_type: &str) -> Option<PaymentStatus> {
    match event_type {
        "payment_intent.succeeded" | "charge.succeeded" => Some(PaymentStatus::Succeeded),
        "payment_intent.processing" => Some(PaymentStatus::Processing),
        "payment_intent.payment_failed" | "charge.failed" => Some(PaymentStatus::Failed),
        "payment_intent.canceled" => Some(PaymentStatus::Cancelled),
        "charge.refunded" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

fn payment_id(event: &WebhookEvent) -> Option<&str> {
    event
        .data
        .pointer("/object/id")
        .or_else(|| event.data.get("payment_id"))
        .and_then(|v| v.as_str())
}

#[async_trait]
impl WebhookEventHandler for PaymentEventHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        let Some(status) = status_for_event(&event.event_type) else {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring unhandled event type");
            return Ok(());
        };
        let Some(payment_id) = payment_id(event) else {
            // Redelivering a payload without an id cannot succeed later.
            tracing::warn!(event_id = %event.id, event_type = %event.event_type, "Payment event without payment id");
            return Ok(());
        };

        self.payments.record_status(payment_id, status);
        tracing::info!(
            event_id = %event.id,
            payment_id = %payment_id,
            status = ?status,
            "Payment status updated from webhook"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(status_for_event("payment_intent.succeeded"), Some(PaymentStatus::Succeeded));
        assert_eq!(status_for_event("charge.refunded"), Some(PaymentStatus::Refunded));
        assert_eq!(status_for_event("customer.created"), None);
    }

    #[test]
    fn test_payment_id_locations() {
        let nested = WebhookEvent {
            id: "evt_1".into(),
            event_type: "payment_intent.succeeded".into(),
            created: 0,
            data: serde_json::json!({"object": {"id": "pi_1"}}),
        };
        assert_eq!(payment_id(&nested), Some("pi_1"));

        let flat = WebhookEvent {
            data: serde_json::json!({"payment_id": "pi_2"}),
            ..nested
        };
        assert_eq!(payment_id(&flat), Some("pi_2"));
    }
}
