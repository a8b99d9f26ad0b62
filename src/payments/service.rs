//! Payment call-site orchestrator.
//!
//! # Data Flow
//! ```text
//! process_payment / process_refund:
//!     → field validation (amount, currency)
//!     → DependencyGuard (retry → breaker → timeout) → PaymentGateway
//!     → remember the resulting status
//!
//! payment_status:
//!     → gateway lookup (guarded)
//!     → fallback: last status seen by this process (charge result or webhook)
//!     → default: Pending
//! ```
//!
//! # Design Decisions
//! - Charges never fall back to a substitute result; a failed charge is a failure
//! - Status lookups degrade, because checkout confirmation pages must render

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{
    PaymentError, PaymentOutcome, PaymentRequest, PaymentResult, PaymentStatus, RefundRequest, RefundResult,
    RefundStatus, StatusLookup,
};
use crate::resilience::{CircuitSnapshot, DependencyGuard, FallbackConfig, FallbackHandler, GuardedOutcome};
use crate::security::masking::mask_identifier;
use crate::security::validation::{validate_amount, validate_currency, ValidationError};

/// Breaker and retry name for the payment gateway.
pub const PAYMENT_GATEWAY: &str = "payment_gateway";

pub struct PaymentResilienceService {
    gateway: Arc<dyn PaymentGateway>,
    guard: DependencyGuard,
    status_fallback: FallbackHandler<PaymentStatus>,
    last_known: DashMap<String, PaymentStatus>,
}

impl PaymentResilienceService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, guard: DependencyGuard) -> Self {
        let status_config = FallbackConfig::default()
            .without_stale_data()
            .with_default(PaymentStatus::Pending);
        Self {
            gateway,
            guard,
            status_fallback: FallbackHandler::new("payment_status", status_config),
            last_known: DashMap::new(),
        }
    }

    pub async fn process_payment(
        &self,
        request: &PaymentRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<PaymentOutcome<PaymentResult>, PaymentError> {
        validate_amount("amount_minor", request.amount_minor)?;
        validate_currency("currency", &request.currency)?;
        if request.payment_method.trim().is_empty() {
            return Err(ValidationError::MissingField("payment_method".into()).into());
        }

        let outcome = self.guard.call(|| self.gateway.charge(request), cancel).await;
        let result = self.settle(outcome, "charge", &request.order_id)?;
        self.record_status(&result.value.payment_id, result.value.status);
        tracing::info!(
            order_id = %request.order_id,
            customer = %mask_identifier(&request.customer_id),
            payment_id = %result.value.payment_id,
            status = ?result.value.status,
            attempts = result.attempts,
            "Payment processed"
        );
        Ok(result)
    }

    pub async fn process_refund(
        &self,
        request: &RefundRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<PaymentOutcome<RefundResult>, PaymentError> {
        if let Some(amount) = request.amount_minor {
            validate_amount("amount_minor", amount)?;
        }

        let outcome = self.guard.call(|| self.gateway.refund(request), cancel).await;
        let result = self.settle(outcome, "refund", &request.payment_id)?;
        if result.value.status == RefundStatus::Succeeded && request.amount_minor.is_none() {
            self.record_status(&request.payment_id, PaymentStatus::Refunded);
        }
        tracing::info!(
            payment_id = %request.payment_id,
            refund_id = %result.value.refund_id,
            attempts = result.attempts,
            "Refund processed"
        );
        Ok(result)
    }

    /// Current status, degrading to the last known status and then `Pending`.
    pub async fn payment_status(&self, payment_id: &str) -> Result<StatusLookup, PaymentError> {
        let primary = move || async move {
            let outcome = self.guard.call(|| self.gateway.payment_status(payment_id), None).await;
            let attempts = outcome.attempts;
            outcome
                .into_result()
                .map_err(|e| PaymentError::from_retry(e, attempts))
        };
        let last_known = move || async move {
            self.last_known_status(payment_id)
                .ok_or_else(|| PaymentError::UnknownPayment(payment_id.to_string()))
        };

        let outcome = self.status_fallback.execute_with(primary, last_known).await;
        let source = outcome.source;
        let degraded = outcome.is_fallback();
        let status = outcome.into_result()?;
        if !degraded {
            self.record_status(payment_id, status);
        }
        Ok(StatusLookup {
            status,
            source,
            degraded,
        })
    }

    pub fn is_gateway_available(&self) -> bool {
        self.guard.breaker().is_available()
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.guard.breaker().snapshot()
    }

    /// Remember a status learned outside the gateway call path (e.g. a webhook).
    pub fn record_status(&self, payment_id: &str, status: PaymentStatus) {
        self.last_known.insert(payment_id.to_string(), status);
    }

    pub fn last_known_status(&self, payment_id: &str) -> Option<PaymentStatus> {
        self.last_known.get(payment_id).map(|s| *s)
    }

    fn settle<T>(
        &self,
        outcome: GuardedOutcome<T>,
        operation: &'static str,
        reference: &str,
    ) -> Result<PaymentOutcome<T>, PaymentError> {
        let attempts = outcome.attempts;
        let total_duration = outcome.total_duration;
        match outcome.result {
            Ok(value) => Ok(PaymentOutcome {
                value,
                attempts,
                total_duration,
            }),
            Err(e) => {
                let error = PaymentError::from_retry(e, attempts);
                if error.is_business_error() {
                    tracing::info!(operation, reference = %reference, error = %error, "Payment rejected");
                } else {
                    tracing::error!(operation, reference = %reference, attempts, error = %error, "Payment gateway call failed");
                }
                Err(error)
            }
        }
    }
}
