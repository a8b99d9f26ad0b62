use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::{ConfigError, DownstreamError, FallbackSource, ResilienceError, RetryError};
use crate::security::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_price_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// ISO 3166-1 alpha-2.
    pub country: String,
    pub region: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCheck {
    pub available: bool,
    pub unavailable_skus: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRequest {
    pub destination: Address,
    pub items: Vec<CartItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub amount_minor: i64,
    pub currency: String,
    pub carrier: String,
    pub estimated_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRequest {
    pub destination: Address,
    pub subtotal_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxQuote {
    pub amount_minor: i64,
    /// Effective rate, e.g. `0.0825`.
    pub rate: f64,
}

/// A checkout answer and which degradation tier produced it.
///
/// Degraded answers never block checkout; callers decide whether to warn
/// (e.g. "shipping estimate may be approximate").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degradable<T> {
    pub value: T,
    pub source: FallbackSource,
    pub degraded: bool,
    pub is_stale: bool,
    pub cached_at_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] ConfigError),

    #[error("{dependency} failed after {attempts} attempt(s): {source}")]
    Dependency {
        dependency: &'static str,
        attempts: u32,
        #[source]
        source: RetryError<ResilienceError<DownstreamError>>,
    },
}
