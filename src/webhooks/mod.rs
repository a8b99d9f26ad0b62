//! Inbound payment-gateway webhooks.
//!
//! # Data Flow
//! ```text
//! Raw body + X-Webhook-Signature
//!     → signature.rs (HMAC-SHA256 over "{t}.{body}")
//!     → ledger.rs (idempotency check, handler, retry queue)
//!     → WebhookAck
//! ```
//!
//! # Design Decisions
//! - The gateway always gets HTTP 200 so it does not hot-loop redeliveries
//!   faster than the internal retry schedule
//! - Verification is skipped only when no secret is configured

pub mod error;
pub mod ledger;
pub mod signature;

pub use error::WebhookError;
pub use ledger::{
    AcknowledgeOnly, RetryQueueItem, RetryRunReport, RetryScheduling, SharedWebhookHandler, WebhookAck,
    WebhookConfig, WebhookEvent, WebhookEventHandler, WebhookHandlerService,
};
pub use signature::SIGNATURE_HEADER;
