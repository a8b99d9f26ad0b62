//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream dependency:
//!     → timeouts.rs (bound the call with a deadline)
//!     → circuit_breaker.rs (fail fast while the dependency is known-bad)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → fallback.rs (fallback fn → stale cache → default once retries are spent)
//!
//! guard.rs stacks the first three for one named dependency.
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - The breaker sits inside the retry loop so each attempt is accounted
//! - Business errors are neither retried nor counted by the breaker
//! - All resilience logic is composable; orchestrators choose the stack

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitSnapshot, CircuitState,
};
pub use error::{ConfigError, DownstreamError, ResilienceError, ResilienceResult};
pub use fallback::{FallbackConfig, FallbackHandler, FallbackManager, FallbackOutcome, FallbackSource};
pub use guard::{DependencyGuard, GuardedOutcome};
pub use retries::{RetryConfig, RetryError, RetryOptions, RetryOutcome, RetryStrategy};
