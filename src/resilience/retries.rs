//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as transient or not
//! - Execute retries with exponential backoff + jitter
//! - Stop early on cancellation
//!
//! # Design Decisions
//! - `max_retries` bounds the total number of attempts, including the first
//! - Non-transient failures abort immediately without consuming budget
//! - Backoff sleeps yield to the runtime; nothing blocks the thread
//! - Connection errors, timeouts, 5xx and 429 are transient by default

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::error::{ConfigError, DownstreamError, ResilienceError};

/// Backoff parameters for a [`RetryStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (first call included).
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Growth factor between attempts, at least 1.
    pub backoff_multiplier: f64,
    /// Fraction of the capped delay added as random jitter, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl RetryConfig {
    pub const PAYMENT: RetryConfig = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 1_000,
        max_delay_ms: 10_000,
        backoff_multiplier: 2.0,
        jitter_factor: 0.1,
    };

    pub const INVENTORY: RetryConfig = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 500,
        max_delay_ms: 5_000,
        backoff_multiplier: 2.0,
        jitter_factor: 0.2,
    };

    pub const SHIPPING: RetryConfig = RetryConfig {
        max_retries: 2,
        initial_delay_ms: 500,
        max_delay_ms: 3_000,
        backoff_multiplier: 2.0,
        jitter_factor: 0.2,
    };

    pub const TAX: RetryConfig = RetryConfig {
        max_retries: 2,
        initial_delay_ms: 500,
        max_delay_ms: 3_000,
        backoff_multiplier: 2.0,
        jitter_factor: 0.2,
    };

    pub const WEBHOOK: RetryConfig = RetryConfig {
        max_retries: 5,
        initial_delay_ms: 1_000,
        max_delay_ms: 30_000,
        backoff_multiplier: 2.0,
        jitter_factor: 0.1,
    };

    pub const EXTERNAL_API: RetryConfig = RetryConfig {
        max_retries: 3,
        initial_delay_ms: 1_000,
        max_delay_ms: 10_000,
        backoff_multiplier: 2.0,
        jitter_factor: 0.1,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries < 1 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(
                "initial_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid("backoff_multiplier must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid("jitter_factor must be between 0 and 1".into()));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::EXTERNAL_API
    }
}

/// Why a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("non-transient failure: {0}")]
    NonTransient(#[source] E),

    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::NonTransient(e) => Some(e),
            RetryError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::NonTransient(e) => Some(e),
            RetryError::Cancelled { last_error, .. } => last_error,
        }
    }
}

/// Result of one [`RetryStrategy::execute`] call.
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub result: Result<T, RetryError<E>>,
    /// Attempts actually made.
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.result
    }
}

type RetryCallback<'a, E> = Box<dyn Fn(u32, &E, Duration) + Send + Sync + 'a>;
type TransientPredicate<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;

/// Per-call hooks for [`RetryStrategy::execute`].
pub struct RetryOptions<'a, E> {
    on_retry: Option<RetryCallback<'a, E>>,
    is_transient: Option<TransientPredicate<'a, E>>,
    cancel: Option<CancellationToken>,
}

impl<'a, E> Default for RetryOptions<'a, E> {
    fn default() -> Self {
        Self {
            on_retry: None,
            is_transient: None,
            cancel: None,
        }
    }
}

impl<'a, E> RetryOptions<'a, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `(attempt, error, delay)` before each backoff sleep.
    pub fn on_retry(mut self, callback: impl Fn(u32, &E, Duration) + Send + Sync + 'a) -> Self {
        self.on_retry = Some(Box::new(callback));
        self
    }

    /// Replace the default transient classifier.
    pub fn is_transient(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.is_transient = Some(Box::new(predicate));
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Bounded exponential-backoff retries around an async operation.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    name: String,
    config: RetryConfig,
}

impl RetryStrategy {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute with default options.
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute(operation, RetryOptions::default()).await
    }

    pub async fn execute<F, Fut, T, E>(
        &self,
        mut operation: F,
        options: RetryOptions<'_, E>,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = tokio::time::Instant::now();
        let finish = |result, attempts| RetryOutcome {
            result,
            attempts,
            total_duration: started.elapsed(),
        };

        let mut attempt = 0;
        loop {
            if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return finish(
                    Err(RetryError::Cancelled {
                        attempts: attempt,
                        last_error: None,
                    }),
                    attempt,
                );
            }

            attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = %self.name, attempts = attempt, "Operation succeeded after retry");
                    }
                    return finish(Ok(value), attempt);
                }
                Err(error) => error,
            };

            let transient = match &options.is_transient {
                Some(predicate) => predicate(&error),
                None => is_transient_error(&error),
            };
            if !transient {
                tracing::warn!(operation = %self.name, attempt, error = %error, "Non-transient failure, not retrying");
                return finish(Err(RetryError::NonTransient(error)), attempt);
            }
            if attempt >= self.config.max_retries {
                tracing::error!(operation = %self.name, attempts = attempt, error = %error, "Retries exhausted");
                return finish(
                    Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: error,
                    }),
                    attempt,
                );
            }

            let delay = calculate_backoff(attempt, &self.config);
            if let Some(callback) = &options.on_retry {
                callback(attempt, &error, delay);
            }
            metrics::record_retry_attempt(&self.name);
            tracing::info!(operation = %self.name, attempt, delay = ?delay, error = %error, "Retrying after transient failure");

            match &options.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {
                            tracing::info!(operation = %self.name, attempts = attempt, "Retry cancelled during backoff");
                            return finish(
                                Err(RetryError::Cancelled { attempts: attempt, last_error: Some(error) }),
                                attempt,
                            );
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "eai_again",
    "socket hang up",
    "connection reset",
    "connection refused",
    "connection closed",
    "too many requests",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
];

/// Default transient classifier.
///
/// Recognises [`DownstreamError`], resilience wrappers around it, `reqwest`
/// and `std::io` errors, then falls back to matching well-known network
/// markers and 5xx/429 status codes in the message of the error or any source.
pub fn is_transient_error(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(verdict) = classify_known(err) {
            return verdict;
        }
        if message_looks_transient(&err.to_string()) {
            return true;
        }
        current = err.source();
    }
    false
}

fn classify_known(err: &(dyn std::error::Error + 'static)) -> Option<bool> {
    if let Some(d) = err.downcast_ref::<DownstreamError>() {
        return Some(d.is_transient());
    }
    if let Some(r) = err.downcast_ref::<ResilienceError<DownstreamError>>() {
        return Some(match r {
            ResilienceError::Operation(d) => d.is_transient(),
            // Retrying into an open breaker only burns budget.
            ResilienceError::CircuitOpen { .. } => false,
        });
    }
    if let Some(r) = err.downcast_ref::<reqwest::Error>() {
        if r.is_timeout() || r.is_connect() {
            return Some(true);
        }
        if let Some(status) = r.status() {
            return Some(status.is_server_error() || status.as_u16() == 429);
        }
        return None;
    }
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        use std::io::ErrorKind::*;
        return Some(matches!(
            io.kind(),
            ConnectionReset | ConnectionRefused | ConnectionAborted | TimedOut | BrokenPipe | NotConnected | UnexpectedEof
        ));
    }
    None
}

fn message_looks_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return true;
    }
    // Bare status codes such as "HTTP 503" or "status 429".
    lower
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|token| token.parse::<u16>().ok())
        .any(|code| (500..=599).contains(&code) || code == 429)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_config_validation() {
        for preset in [
            RetryConfig::PAYMENT,
            RetryConfig::INVENTORY,
            RetryConfig::SHIPPING,
            RetryConfig::TAX,
            RetryConfig::WEBHOOK,
            RetryConfig::EXTERNAL_API,
        ] {
            assert!(preset.validate().is_ok());
        }
        assert!(RetryConfig { max_retries: 0, ..fast_config(1) }.validate().is_err());
        assert!(RetryConfig { initial_delay_ms: 5_000, ..fast_config(1) }.validate().is_err());
        assert!(RetryConfig { backoff_multiplier: 0.5, ..fast_config(1) }.validate().is_err());
        assert!(RetryConfig { backoff_multiplier: f64::NAN, ..fast_config(1) }.validate().is_err());
        assert!(RetryConfig { jitter_factor: 1.5, ..fast_config(1) }.validate().is_err());
        assert!(RetryStrategy::new("bad", RetryConfig { max_retries: 0, ..fast_config(1) }).is_err());
    }

    #[test]
    fn test_default_classifier() {
        assert!(is_transient_error(&DownstreamError::Network("reset".into())));
        assert!(!is_transient_error(&DownstreamError::Declined("card".into())));
        assert!(is_transient_error(&std::io::Error::from(std::io::ErrorKind::ConnectionReset)));
        assert!(!is_transient_error(&std::io::Error::from(std::io::ErrorKind::PermissionDenied)));
        assert!(is_transient_error(&std::io::Error::other("socket hang up")));
        assert!(is_transient_error(&std::io::Error::other("upstream returned 503")));
        assert!(!is_transient_error(&std::io::Error::other("validation failed: 400")));

        let open: ResilienceError<DownstreamError> = ResilienceError::CircuitOpen {
            name: "gateway".into(),
            retry_after_ms: 10,
        };
        assert!(!is_transient_error(&open));
        let wrapped: ResilienceError<DownstreamError> =
            ResilienceError::Operation(DownstreamError::Http { status: 502, message: "bad gateway".into() });
        assert!(is_transient_error(&wrapped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let strategy = RetryStrategy::new("charge", fast_config(3)).unwrap();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let outcome = strategy
            .run(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DownstreamError::Timeout(Duration::from_secs(5)))
                } else {
                    Ok("charged")
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap(), "charged");
        // 100ms + 200ms of backoff under paused time.
        assert!(outcome.total_duration >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_max_retries() {
        let strategy = RetryStrategy::new("inventory", fast_config(4)).unwrap();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let outcome: RetryOutcome<(), _> = strategy
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DownstreamError::Http { status: 503, message: "unavailable".into() })
            })
            .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(outcome.result, Err(RetryError::Exhausted { attempts: 4, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_aborts_immediately() {
        let strategy = RetryStrategy::new("charge", fast_config(5)).unwrap();
        let outcome: RetryOutcome<(), _> = strategy
            .run(|| async { Err(DownstreamError::Declined("insufficient funds".into())) })
            .await;

        assert_eq!(outcome.attempts, 1);
        let err = outcome.result.unwrap_err();
        assert!(matches!(err, RetryError::NonTransient(DownstreamError::Declined(_))));
        assert_eq!(outcome.total_duration, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_and_on_retry_callback() {
        let strategy = RetryStrategy::new("tax", fast_config(3)).unwrap();
        let delays = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = delays.clone();

        let outcome: RetryOutcome<(), _> = strategy
            .execute(
                || async { Err(DownstreamError::Invalid("normally fatal".into())) },
                RetryOptions::new()
                    .is_transient(|_| true)
                    .on_retry(move |attempt, _err, delay| recorded.lock().push((attempt, delay))),
            )
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            *delays.lock(),
            vec![(1, Duration::from_millis(100)), (2, Duration::from_millis(200))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_backoff() {
        let strategy = RetryStrategy::new(
            "shipping",
            RetryConfig {
                initial_delay_ms: 10_000,
                max_delay_ms: 10_000,
                ..fast_config(5)
            },
        )
        .unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome: RetryOutcome<(), _> = strategy
            .execute(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(DownstreamError::Network("refused".into()))
                },
                RetryOptions::new().cancellation(token),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match outcome.result {
            Err(RetryError::Cancelled { attempts, last_error }) => {
                assert_eq!(attempts, 1);
                assert!(last_error.is_some());
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_already_cancelled_token_makes_no_attempt() {
        let strategy = RetryStrategy::new("charge", fast_config(3)).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let outcome: RetryOutcome<(), DownstreamError> = strategy
            .execute(|| async { Ok(()) }, RetryOptions::new().cancellation(token))
            .await;
        assert_eq!(outcome.attempts, 0);
        assert!(matches!(outcome.result, Err(RetryError::Cancelled { attempts: 0, last_error: None })));
    }
}
