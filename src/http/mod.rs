//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (assign request ID, open trace span)
//!     → server.rs (timeout, body limit, per-IP webhook rate limit)
//!     → /webhooks/payments → size/shape checks → WebhookHandlerService::process
//!     → /health → breaker snapshots
//!     → JSON response (ack or health report)
//! ```

pub mod request;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
