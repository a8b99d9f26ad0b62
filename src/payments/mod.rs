//! Payment gateway integration.

pub mod events;
pub mod gateway;
pub mod service;
pub mod types;

pub use events::PaymentEventHandler;
pub use gateway::PaymentGateway;
pub use service::{PaymentResilienceService, PAYMENT_GATEWAY};
pub use types::{
    PaymentError, PaymentOutcome, PaymentRequest, PaymentResult, PaymentStatus, RefundRequest, RefundResult,
    RefundStatus, StatusLookup,
};
