//! Retry, breaker and deadline stacked around one downstream dependency.
//!
//! ```text
//! RetryStrategy
//!     → CircuitBreaker (each attempt is accounted)
//!         → with_timeout (each attempt has a deadline)
//!             → operation
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, FailurePredicate,
};
use crate::resilience::error::{ConfigError, DownstreamError, ResilienceError};
use crate::resilience::retries::{RetryConfig, RetryOptions, RetryOutcome, RetryStrategy};
use crate::resilience::timeouts::with_timeout;

pub type GuardedOutcome<T> = RetryOutcome<T, ResilienceError<DownstreamError>>;

/// Breaker predicate that ignores business outcomes such as declined cards.
pub fn business_errors_excluded() -> FailurePredicate {
    Arc::new(|error: &(dyn std::error::Error + 'static)| match error.downcast_ref::<DownstreamError>() {
        Some(e) => !e.is_business_error(),
        None => true,
    })
}

pub struct DependencyGuard {
    breaker: Arc<CircuitBreaker>,
    retry: RetryStrategy,
    call_timeout: Duration,
}

impl DependencyGuard {
    /// Registers a breaker under `name` with business errors excluded from
    /// accounting. Fails with `DuplicateName` if the name is already taken,
    /// including by a breaker created lazily through `get_or_create`.
    pub fn new(
        breakers: &CircuitBreakerManager,
        name: &str,
        breaker_config: CircuitBreakerConfig,
        retry: RetryConfig,
        call_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let retry = RetryStrategy::new(name, retry)?;
        let breaker = breakers.register(name, breaker_config, Some(business_errors_excluded()))?;
        Ok(Self {
            breaker,
            retry,
            call_timeout,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn call<T, F, Fut>(&self, operation: F, cancel: Option<&CancellationToken>) -> GuardedOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DownstreamError>>,
    {
        let mut options = RetryOptions::new();
        if let Some(token) = cancel {
            options = options.cancellation(token.clone());
        }

        let op = &operation;
        let breaker: &CircuitBreaker = &self.breaker;
        let limit = self.call_timeout;
        self.retry
            .execute(move || breaker.execute(move || with_timeout(limit, op())), options)
            .await
    }
}
