//! Checkout dependencies (inventory, shipping, tax) behind graceful degradation.

pub mod dependencies;
pub mod service;
pub mod types;

pub use dependencies::{InventoryService, ShippingCalculator, TaxCalculator};
pub use service::{CheckoutDependencies, CheckoutGuards, CheckoutResilienceService, CheckoutSettings};
pub use types::{
    Address, CartItem, CheckoutError, Degradable, InventoryCheck, ShippingQuote, ShippingRequest, TaxQuote,
    TaxRequest,
};
