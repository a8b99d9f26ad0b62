//! Checkout call-site orchestrator.
//!
//! # Data Flow
//! ```text
//! validate_inventory → inventory guard → InventoryService
//!     degraded: optimistic "available" (confirmed again at fulfilment)
//! calculate_shipping → shipping guard → ShippingCalculator
//!     degraded: last quote for the same region → flat rate
//! calculate_tax → tax guard → TaxCalculator
//!     degraded: last rate for the same region → configured default rate
//! ```
//!
//! # Design Decisions
//! - Every dependency has its own breaker, retry budget and deadline
//! - Stale caches are keyed by destination region so one customer's quote is
//!   never served for another region
//! - Destinations are validated before they become cache keys, and the number
//!   of per-destination caches is capped; past the cap new destinations get
//!   the default without a stale tier
//! - Degraded tax is recomputed from the cached or default rate against the
//!   current subtotal

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::checkout::dependencies::{InventoryService, ShippingCalculator, TaxCalculator};
use crate::checkout::types::{
    Address, CartItem, CheckoutError, Degradable, InventoryCheck, ShippingQuote, ShippingRequest, TaxQuote, TaxRequest,
};
use crate::resilience::{
    DependencyGuard, DownstreamError, FallbackConfig, FallbackHandler, FallbackManager, FallbackOutcome,
    FallbackSource,
};
use crate::security::validation::{
    validate_amount, validate_country, validate_currency, validate_region, ValidationError,
};

pub const INVENTORY: &str = "inventory";
pub const SHIPPING: &str = "shipping";
pub const TAX: &str = "tax";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckoutSettings {
    pub call_timeout_ms: u64,
    pub payment_timeout_ms: u64,
    pub flat_shipping_minor: i64,
    pub shipping_currency: String,
    pub default_tax_rate: f64,
    /// Upper bound on per-destination fallback caches across shipping and tax.
    pub max_destination_caches: usize,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            payment_timeout_ms: 10_000,
            flat_shipping_minor: 999,
            shipping_currency: "USD".to_string(),
            default_tax_rate: 0.0,
            max_destination_caches: 1_000,
        }
    }
}

pub struct CheckoutDependencies {
    pub inventory: Arc<dyn InventoryService>,
    pub shipping: Arc<dyn ShippingCalculator>,
    pub tax: Arc<dyn TaxCalculator>,
}

pub struct CheckoutGuards {
    pub inventory: DependencyGuard,
    pub shipping: DependencyGuard,
    pub tax: DependencyGuard,
}

pub struct CheckoutResilienceService {
    deps: CheckoutDependencies,
    guards: CheckoutGuards,
    fallbacks: Arc<FallbackManager>,
    settings: CheckoutSettings,
}

impl CheckoutResilienceService {
    pub fn new(
        deps: CheckoutDependencies,
        guards: CheckoutGuards,
        fallbacks: Arc<FallbackManager>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            deps,
            guards,
            fallbacks,
            settings,
        }
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    pub async fn validate_inventory(
        &self,
        items: &[CartItem],
        cancel: Option<&CancellationToken>,
    ) -> Result<Degradable<InventoryCheck>, CheckoutError> {
        validate_items(items)?;

        let optimistic = InventoryCheck {
            available: true,
            unavailable_skus: Vec::new(),
        };
        let handler = self.fallbacks.get_or_register(
            INVENTORY,
            FallbackConfig::default().without_stale_data().with_default(optimistic),
        )?;
        let inventory = &self.deps.inventory;
        let outcome = guarded(
            &handler,
            &self.guards.inventory,
            INVENTORY,
            move || inventory.check_availability(items),
            cancel,
        )
        .await;
        if outcome.source == FallbackSource::Default {
            tracing::warn!(items = items.len(), "Inventory unavailable; assuming stock and deferring to fulfilment");
        }
        degradable(outcome)
    }

    pub async fn calculate_shipping(
        &self,
        request: &ShippingRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Degradable<ShippingQuote>, CheckoutError> {
        validate_items(&request.items)?;
        validate_destination(&request.destination)?;

        let flat = ShippingQuote {
            amount_minor: self.settings.flat_shipping_minor,
            currency: self.settings.shipping_currency.clone(),
            carrier: "flat_rate".to_string(),
            estimated_days: None,
        };
        let handler = self.destination_handler(SHIPPING, &request.destination, flat)?;
        let shipping = &self.deps.shipping;
        let outcome = guarded(
            &handler,
            &self.guards.shipping,
            SHIPPING,
            move || shipping.quote(request),
            cancel,
        )
        .await;
        degradable(outcome)
    }

    pub async fn calculate_tax(
        &self,
        request: &TaxRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Degradable<TaxQuote>, CheckoutError> {
        if request.subtotal_minor < 0 {
            return Err(ValidationError::InvalidField {
                field: "subtotal_minor".into(),
                reason: "must not be negative".into(),
            }
            .into());
        }
        validate_currency("currency", &request.currency)?;
        validate_destination(&request.destination)?;

        let default = TaxQuote {
            amount_minor: 0,
            rate: self.settings.default_tax_rate,
        };
        let handler = self.destination_handler(TAX, &request.destination, default)?;
        let tax = &self.deps.tax;
        let outcome = guarded(&handler, &self.guards.tax, TAX, move || tax.calculate(request), cancel).await;

        let mut result = degradable(outcome)?;
        if result.degraded {
            result.value.amount_minor = (request.subtotal_minor as f64 * result.value.rate).round() as i64;
        }
        Ok(result)
    }

    fn destination_handler<T>(
        &self,
        dependency: &'static str,
        destination: &Address,
        default: T,
    ) -> Result<Arc<FallbackHandler<T>>, CheckoutError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = format!("{dependency}:{}:{}", destination.country, destination.region);
        if self.fallbacks.contains(&key) || self.fallbacks.len() < self.settings.max_destination_caches {
            return Ok(self
                .fallbacks
                .get_or_register(&key, FallbackConfig::default().with_default(default))?);
        }
        tracing::debug!(dependency, "Destination cache limit reached; serving default without stale data");
        Ok(self.fallbacks.get_or_register(
            &format!("{dependency}:uncached"),
            FallbackConfig::default().without_stale_data().with_default(default),
        )?)
    }
}

fn validate_destination(destination: &Address) -> Result<(), ValidationError> {
    validate_country("destination.country", &destination.country)?;
    validate_region("destination.region", &destination.region)
}

async fn guarded<T, F, Fut>(
    handler: &FallbackHandler<T>,
    guard: &DependencyGuard,
    dependency: &'static str,
    operation: F,
    cancel: Option<&CancellationToken>,
) -> FallbackOutcome<T, CheckoutError>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, DownstreamError>>,
{
    handler
        .execute(move || async move {
            let outcome = guard.call(operation, cancel).await;
            let attempts = outcome.attempts;
            outcome.into_result().map_err(|source| CheckoutError::Dependency {
                dependency,
                attempts,
                source,
            })
        })
        .await
}

fn degradable<T>(outcome: FallbackOutcome<T, CheckoutError>) -> Result<Degradable<T>, CheckoutError> {
    let source = outcome.source;
    let degraded = outcome.is_fallback();
    let is_stale = outcome.is_stale;
    let cached_at_ms = outcome.cached_at_ms;
    Ok(Degradable {
        value: outcome.into_result()?,
        source,
        degraded,
        is_stale,
        cached_at_ms,
    })
}

fn validate_items(items: &[CartItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::MissingField("items".into()));
    }
    for item in items {
        if item.quantity == 0 {
            return Err(ValidationError::InvalidField {
                field: format!("items[{}].quantity", item.sku),
                reason: "must be at least 1".into(),
            });
        }
        validate_amount("unit_price_minor", item.unit_price_minor)?;
    }
    Ok(())
}
