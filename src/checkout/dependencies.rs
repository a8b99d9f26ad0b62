//! Downstream services consulted during checkout.

use async_trait::async_trait;

use crate::checkout::types::{CartItem, InventoryCheck, ShippingQuote, ShippingRequest, TaxQuote, TaxRequest};
use crate::resilience::DownstreamError;

#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn check_availability(&self, items: &[CartItem]) -> Result<InventoryCheck, DownstreamError>;
}

#[async_trait]
pub trait ShippingCalculator: Send + Sync {
    async fn quote(&self, request: &ShippingRequest) -> Result<ShippingQuote, DownstreamError>;
}

#[async_trait]
pub trait TaxCalculator: Send + Sync {
    async fn calculate(&self, request: &TaxRequest) -> Result<TaxQuote, DownstreamError>;
}
