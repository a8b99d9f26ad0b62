//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (fixed-window counter per identifier and preset)
//!     → brute_force.rs (blocked IP / locked account gate on auth endpoints)
//!     → replay.rs (timestamp window, single-use nonce, duplicate cap)
//!     → validation.rs (body size, JSON shape, forbidden keys)
//!     → Pass to business logic
//! ```
//!
//! # Design Decisions
//! - Fail closed: every rejection denies the request and is never retried
//! - Identifiers and IPs are masked before they reach the log stream
//! - All state is process-local; each service owns its maps

pub mod brute_force;
pub mod error;
pub mod masking;
pub mod rate_limit;
pub mod replay;
pub mod validation;

pub use brute_force::{BruteForceConfig, BruteForceProtectionService, LoginAttemptOutcome};
pub use error::SecurityError;
pub use rate_limit::{LimitSpec, RateLimitPreset, RateLimitRule, RateLimitRules, RateLimiterService};
pub use replay::{DuplicateCheck, FreshnessCheck, ReplayAttackProtectionService, ReplayConfig};
pub use validation::{RequestValidationService, ValidationError, ValidationLimits};
