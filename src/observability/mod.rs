//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, identifiers masked)
//!     → metrics.rs (counters, gauges)
//!
//! Circuit breakers additionally produce:
//!     → alerts.rs (transition alerts: log or HTTP webhook)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → On-call alert receiver
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments through the `metrics` facade)
//! - Alert delivery is resolved once at startup, not per transition

pub mod alerts;
pub mod logging;
pub mod metrics;
