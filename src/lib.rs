//! Checkout Guard
//!
//! Fault tolerance and abuse protection for payment and checkout flows.
//!
//! # Architecture Overview
//!
//! ```text
//!   Provider webhook ──▶ http (request id, limits) ──▶ webhooks (signature, ledger, retries)
//!                                                            │
//!                                                            ▼
//!   Application ──────▶ payments / checkout orchestrators ──▶ resilience
//!                                                             (timeout → breaker → retry → fallback)
//!                                                            │
//!                                                            ▼
//!                                                 gateway / inventory / shipping / tax
//!
//!   Cross-cutting: security (rate limit, brute force, replay, validation),
//!                  config, observability, lifecycle, admin API
//! ```

pub mod admin;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod payments;
pub mod resilience;
pub mod security;
pub mod webhooks;

pub use config::schema::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::{Downstreams, GuardServices, Shutdown};
