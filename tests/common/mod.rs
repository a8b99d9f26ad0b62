//! Shared mock downstreams and fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use checkout_guard::checkout::{
    Address, CartItem, CheckoutDependencies, InventoryCheck, InventoryService, ShippingCalculator, ShippingQuote,
    ShippingRequest, TaxCalculator, TaxQuote, TaxRequest,
};
use checkout_guard::clock::MockClock;
use checkout_guard::config::schema::{AlertConfig, GuardConfig};
use checkout_guard::payments::{
    PaymentGateway, PaymentRequest, PaymentResult, PaymentStatus, RefundRequest, RefundResult, RefundStatus,
};
use checkout_guard::resilience::DownstreamError;
use checkout_guard::{Downstreams, GuardServices};

pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// What a scripted call does.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(DownstreamError),
    /// Sleep past any sane call timeout.
    Hang,
}

type Gauge = Box<dyn Fn() -> u32 + Send + Sync>;

/// A queue of steps; once drained every call succeeds.
#[derive(Default)]
pub struct Script {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    gauge: Mutex<Option<Gauge>>,
    readings: Mutex<Vec<u32>>,
}

impl Script {
    pub fn push(&self, step: Step, times: usize) {
        let mut steps = self.steps.lock();
        for _ in 0..times {
            steps.push_back(step.clone());
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sample `gauge` at the start of every call.
    pub fn record_on_call(&self, gauge: impl Fn() -> u32 + Send + Sync + 'static) {
        *self.gauge.lock() = Some(Box::new(gauge));
    }

    pub fn readings(&self) -> Vec<u32> {
        self.readings.lock().clone()
    }

    async fn next(&self) -> Result<(), DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gauge) = self.gauge.lock().as_ref() {
            self.readings.lock().push(gauge());
        }
        let step = self.steps.lock().pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(()),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

pub fn unavailable() -> DownstreamError {
    DownstreamError::Http {
        status: 503,
        message: "service unavailable".into(),
    }
}

#[derive(Default)]
pub struct MockGateway {
    pub charges: Script,
    pub statuses: Script,
    pub decline: bool,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentResult, DownstreamError> {
        if self.decline {
            self.charges.calls.fetch_add(1, Ordering::SeqCst);
            return Err(DownstreamError::Declined("card_declined".into()));
        }
        self.charges.next().await?;
        Ok(PaymentResult {
            payment_id: format!("pi_{}", request.order_id),
            status: PaymentStatus::Succeeded,
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, DownstreamError> {
        Ok(RefundResult {
            refund_id: format!("re_{}", request.payment_id),
            payment_id: request.payment_id.clone(),
            amount_minor: request.amount_minor.unwrap_or(0),
            status: RefundStatus::Succeeded,
        })
    }

    async fn payment_status(&self, _payment_id: &str) -> Result<PaymentStatus, DownstreamError> {
        self.statuses.next().await?;
        Ok(PaymentStatus::Succeeded)
    }
}

#[derive(Default)]
pub struct MockInventory {
    pub script: Script,
}

#[async_trait]
impl InventoryService for MockInventory {
    async fn check_availability(&self, items: &[CartItem]) -> Result<InventoryCheck, DownstreamError> {
        self.script.next().await?;
        let unavailable_skus: Vec<String> = items
            .iter()
            .filter(|i| i.sku.starts_with("OOS-"))
            .map(|i| i.sku.clone())
            .collect();
        Ok(InventoryCheck {
            available: unavailable_skus.is_empty(),
            unavailable_skus,
        })
    }
}

#[derive(Default)]
pub struct MockShipping {
    pub script: Script,
}

#[async_trait]
impl ShippingCalculator for MockShipping {
    async fn quote(&self, request: &ShippingRequest) -> Result<ShippingQuote, DownstreamError> {
        self.script.next().await?;
        let units: u32 = request.items.iter().map(|i| i.quantity).sum();
        Ok(ShippingQuote {
            amount_minor: 500 + 100 * i64::from(units),
            currency: "USD".into(),
            carrier: "ups".into(),
            estimated_days: Some(3),
        })
    }
}

#[derive(Default)]
pub struct MockTax {
    pub script: Script,
}

#[async_trait]
impl TaxCalculator for MockTax {
    async fn calculate(&self, request: &TaxRequest) -> Result<TaxQuote, DownstreamError> {
        self.script.next().await?;
        let rate = 0.08;
        Ok(TaxQuote {
            amount_minor: (request.subtotal_minor as f64 * rate).round() as i64,
            rate,
        })
    }
}

pub struct Harness {
    pub services: Arc<GuardServices>,
    pub clock: MockClock,
    pub gateway: Arc<MockGateway>,
    pub inventory: Arc<MockInventory>,
    pub shipping: Arc<MockShipping>,
    pub tax: Arc<MockTax>,
}

pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.alerts = AlertConfig::Disabled;
    config.webhooks.secret = Some(WEBHOOK_SECRET.into());
    config
}

pub fn harness() -> Harness {
    harness_with(test_config(), MockGateway::default())
}

pub fn harness_with(config: GuardConfig, gateway: MockGateway) -> Harness {
    let clock = MockClock::default();
    let gateway = Arc::new(gateway);
    let inventory = Arc::new(MockInventory::default());
    let shipping = Arc::new(MockShipping::default());
    let tax = Arc::new(MockTax::default());

    let downstreams = Downstreams {
        gateway: gateway.clone(),
        checkout: CheckoutDependencies {
            inventory: inventory.clone(),
            shipping: shipping.clone(),
            tax: tax.clone(),
        },
    };
    let services = GuardServices::build_with_clock(config, Some(downstreams), clock.shared())
        .expect("test configuration is valid");

    Harness {
        services: Arc::new(services),
        clock,
        gateway,
        inventory,
        shipping,
        tax,
    }
}

pub fn cart() -> Vec<CartItem> {
    vec![
        CartItem {
            sku: "SKU-1".into(),
            quantity: 2,
            unit_price_minor: 1_500,
        },
        CartItem {
            sku: "SKU-2".into(),
            quantity: 1,
            unit_price_minor: 4_000,
        },
    ]
}

pub fn address(region: &str) -> Address {
    Address {
        country: "US".into(),
        region: region.into(),
        postal_code: "94107".into(),
    }
}
