//! Payment domain types.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::resilience::{DownstreamError, FallbackSource, ResilienceError, RetryError};
use crate::security::ValidationError;

/// A charge request sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: String,
    /// Amount in minor units (cents).
    pub amount_minor: i64,
    pub currency: String,
    pub customer_id: String,
    pub payment_method: String,
    /// Sent to the gateway so a retried charge is not applied twice.
    pub idempotency_key: String,
}

impl PaymentRequest {
    pub fn new(
        order_id: impl Into<String>,
        amount_minor: i64,
        currency: impl Into<String>,
        customer_id: impl Into<String>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            amount_minor,
            currency: currency.into(),
            customer_id: customer_id.into(),
            payment_method: payment_method.into(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Refunded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub payment_id: String,
    /// `None` refunds the full amount.
    pub amount_minor: Option<i64>,
    pub reason: Option<String>,
    pub idempotency_key: String,
}

impl RefundRequest {
    pub fn full(payment_id: impl Into<String>) -> Self {
        Self {
            payment_id: payment_id.into(),
            amount_minor: None,
            reason: None,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn partial(payment_id: impl Into<String>, amount_minor: i64) -> Self {
        Self {
            amount_minor: Some(amount_minor),
            ..Self::full(payment_id)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    pub payment_id: String,
    pub amount_minor: i64,
    pub status: RefundStatus,
}

/// A gateway result with its retry accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub total_duration: Duration,
}

/// A status lookup, possibly served from a degraded tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusLookup {
    pub status: PaymentStatus,
    pub source: FallbackSource,
    /// True when the status did not come from the gateway.
    pub degraded: bool,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("payment declined: {0}")]
    Declined(String),

    #[error("payment gateway unavailable (retry in {retry_after_ms}ms)")]
    GatewayUnavailable { retry_after_ms: u64 },

    #[error("payment gateway call failed after {attempts} attempt(s): {source}")]
    Gateway {
        attempts: u32,
        #[source]
        source: DownstreamError,
    },

    #[error("payment call cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("no status known for payment {0}")]
    UnknownPayment(String),
}

impl PaymentError {
    pub(crate) fn from_retry(error: RetryError<ResilienceError<DownstreamError>>, attempts: u32) -> Self {
        let cause = match error {
            RetryError::Cancelled { attempts, .. } => return PaymentError::Cancelled { attempts },
            RetryError::Exhausted { source, .. } | RetryError::NonTransient(source) => source,
        };
        match cause {
            ResilienceError::CircuitOpen { retry_after_ms, .. } => PaymentError::GatewayUnavailable { retry_after_ms },
            ResilienceError::Operation(DownstreamError::Declined(reason)) => PaymentError::Declined(reason),
            ResilienceError::Operation(source) => PaymentError::Gateway { attempts, source },
        }
    }

    /// Business outcomes the customer can act on, as opposed to outages.
    pub fn is_business_error(&self) -> bool {
        matches!(self, PaymentError::Validation(_) | PaymentError::Declined(_))
    }
}
