use async_trait::async_trait;

use crate::payments::types::{PaymentRequest, PaymentResult, PaymentStatus, RefundRequest, RefundResult};
use crate::resilience::DownstreamError;

/// Client for the external payment gateway.
///
/// Implementations report card declines as [`DownstreamError::Declined`] so
/// they are neither retried nor counted against the gateway's breaker.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentResult, DownstreamError>;

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, DownstreamError>;

    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, DownstreamError>;
}
