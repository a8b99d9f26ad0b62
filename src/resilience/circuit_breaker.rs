//! Circuit breaker for downstream dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast without being invoked
//! - Half-Open: probing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive counted failures >= failure_threshold
//! Open → Half-Open: first call at or after next_attempt_at (now + timeout)
//! Half-Open → Closed: consecutive successes >= success_threshold
//! Half-Open → Open: any counted failure (fresh timeout window)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency name, created lazily by the manager
//! - The record lock is held for bookkeeping only, never across the operation
//! - A failure predicate lets business errors bypass accounting entirely
//! - Transition hooks run after the lock is released

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{SharedClock, SystemClock};
use crate::observability::metrics;
use crate::resilience::error::{ConfigError, ResilienceError, ResilienceResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called with `(name, old, new)` on every transition.
pub type StateChangeHook = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Decides whether an operation error counts toward opening the circuit.
pub type FailurePredicate = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Thresholds and cooldown for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures in Closed before opening.
    pub failure_threshold: u32,
    /// Consecutive successes in Half-Open before closing.
    pub success_threshold: u32,
    /// Time spent Open before a recovery probe is allowed.
    pub timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            timeout,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold < 1 {
            return Err(ConfigError::Invalid("failure_threshold must be at least 1".into()));
        }
        if self.success_threshold < 1 {
            return Err(ConfigError::Invalid("success_threshold must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<u64>,
    opened_at: Option<u64>,
    next_attempt_at: Option<u64>,
}

impl CircuitRecord {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            opened_at: None,
            next_attempt_at: None,
        }
    }
}

/// Point-in-time view of a breaker, for status endpoints and tests.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<u64>,
    pub opened_at: Option<u64>,
    pub next_attempt_at: Option<u64>,
}

type Transition = (CircuitState, CircuitState);

/// A named three-state failure gate around one dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    record: Mutex<CircuitRecord>,
    clock: SharedClock,
    is_failure: Option<FailurePredicate>,
    on_state_change: Option<StateChangeHook>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("record", &*self.record.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker using system time. Rejects invalid thresholds.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_validated(name, config))
    }

    fn with_validated(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            record: Mutex::new(CircuitRecord::closed()),
            clock: SystemClock::shared(),
            is_failure: None,
            on_state_change: None,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Only errors for which the predicate returns true are counted.
    pub fn with_failure_predicate(mut self, predicate: FailurePredicate) -> Self {
        self.is_failure = Some(predicate);
        self
    }

    pub fn with_state_change_hook(mut self, hook: StateChangeHook) -> Self {
        self.on_state_change = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.record.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.record.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.record.lock().success_count
    }

    /// True unless the breaker is open and still cooling down.
    pub fn is_available(&self) -> bool {
        let record = self.record.lock();
        match record.state {
            CircuitState::Open => record
                .next_attempt_at
                .is_some_and(|next| self.clock.now_ms() >= next),
            _ => true,
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let record = self.record.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: record.state,
            failure_count: record.failure_count,
            success_count: record.success_count,
            last_failure_at: record.last_failure_at,
            opened_at: record.opened_at,
            next_attempt_at: record.next_attempt_at,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// While Open and cooling down, the operation is not invoked and
    /// [`ResilienceError::CircuitOpen`] is returned.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Err(retry_after_ms) = self.try_acquire() {
            metrics::record_circuit_rejection(&self.name);
            tracing::debug!(circuit = %self.name, retry_after_ms, "Circuit open, rejecting call");
            return Err(ResilienceError::CircuitOpen {
                name: self.name.clone(),
                retry_after_ms,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                if self.counts_as_failure(&error) {
                    self.record_failure();
                } else {
                    tracing::debug!(circuit = %self.name, error = %error, "Error excluded from circuit accounting");
                }
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Force the breaker back to Closed with zeroed counters.
    pub fn reset(&self) {
        let transition = {
            let mut record = self.record.lock();
            let from = record.state;
            *record = CircuitRecord::closed();
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        if let Some(t) = transition {
            self.emit(t);
        }
    }

    fn counts_as_failure<E>(&self, error: &E) -> bool
    where
        E: std::error::Error + 'static,
    {
        match &self.is_failure {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    /// Admission check. On rejection returns the remaining cooldown in ms.
    fn try_acquire(&self) -> Result<(), u64> {
        let now = self.clock.now_ms();
        let transition = {
            let mut record = self.record.lock();
            if record.state != CircuitState::Open {
                return Ok(());
            }
            let next = record.next_attempt_at.unwrap_or(now);
            if now < next {
                return Err(next - now);
            }
            self.set_state(&mut record, CircuitState::HalfOpen, now)
        };
        self.emit(transition);
        Ok(())
    }

    fn record_success(&self) {
        let now = self.clock.now_ms();
        let transition = {
            let mut record = self.record.lock();
            match record.state {
                CircuitState::Closed => {
                    record.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    record.success_count += 1;
                    if record.success_count >= self.config.success_threshold {
                        Some(self.set_state(&mut record, CircuitState::Closed, now))
                    } else {
                        None
                    }
                }
                // A call admitted before another caller reopened the circuit.
                CircuitState::Open => None,
            }
        };
        if let Some(t) = transition {
            self.emit(t);
        }
    }

    fn record_failure(&self) {
        let now = self.clock.now_ms();
        let transition = {
            let mut record = self.record.lock();
            record.success_count = 0;
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_failure_at = Some(now);
            match record.state {
                CircuitState::Closed if record.failure_count >= self.config.failure_threshold => {
                    Some(self.set_state(&mut record, CircuitState::Open, now))
                }
                CircuitState::HalfOpen => Some(self.set_state(&mut record, CircuitState::Open, now)),
                _ => None,
            }
        };
        if let Some(t) = transition {
            self.emit(t);
        }
    }

    fn set_state(&self, record: &mut CircuitRecord, to: CircuitState, now: u64) -> Transition {
        let from = record.state;
        record.state = to;
        match to {
            CircuitState::Open => {
                record.success_count = 0;
                record.opened_at = Some(now);
                record.next_attempt_at = Some(now + self.config.timeout.as_millis() as u64);
            }
            CircuitState::HalfOpen => {
                record.success_count = 0;
            }
            CircuitState::Closed => {
                record.failure_count = 0;
                record.success_count = 0;
                record.opened_at = None;
                record.next_attempt_at = None;
            }
        }
        (from, to)
    }

    fn emit(&self, (from, to): Transition) {
        match to {
            CircuitState::Open => tracing::warn!(circuit = %self.name, from = %from, "Circuit opened"),
            CircuitState::HalfOpen => tracing::info!(circuit = %self.name, "Circuit half-open, probing dependency"),
            CircuitState::Closed => tracing::info!(circuit = %self.name, from = %from, "Circuit closed"),
        }
        metrics::record_circuit_transition(&self.name, from.as_str(), to.as_str(), to.gauge_value());
        if let Some(hook) = &self.on_state_change {
            hook(&self.name, from, to);
        }
    }
}

/// Registry of breakers keyed by dependency name.
///
/// Names are a namespace: [`register`](Self::register) refuses a name that is
/// already taken, while [`get_or_create`](Self::get_or_create) hands back the
/// existing breaker for lazy call sites.
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerConfig,
    clock: SharedClock,
    hook: Option<StateChangeHook>,
}

impl CircuitBreakerManager {
    pub fn new(defaults: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        defaults.validate()?;
        Ok(Self {
            breakers: DashMap::new(),
            defaults,
            clock: SystemClock::shared(),
            hook: None,
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Hook installed on every breaker the manager creates.
    pub fn with_state_change_hook(mut self, hook: StateChangeHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Register a breaker under a name that must not exist yet.
    pub fn register(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
        is_failure: Option<FailurePredicate>,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        config.validate()?;
        match self.breakers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ConfigError::DuplicateName(name.to_string())),
            Entry::Vacant(slot) => {
                let mut breaker = self.build(name, config);
                if let Some(predicate) = is_failure {
                    breaker = breaker.with_failure_predicate(predicate);
                }
                let breaker = Arc::new(breaker);
                slot.insert(breaker.clone());
                Ok(breaker)
            }
        }
    }

    /// Return the breaker for `name`, creating it with the defaults on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(self.build(name, self.defaults)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Run an operation through the named breaker.
    pub async fn execute<F, Fut, T, E>(&self, name: &str, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let breaker = self.get_or_create(name);
        breaker.execute(operation).await
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Reset one breaker. Returns false if the name is unknown.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.iter().map(|b| b.clone()).collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// `config` must already be validated.
    fn build(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        let mut breaker = CircuitBreaker::with_validated(name, config).with_clock(self.clock.clone());
        if let Some(hook) = &self.hook {
            breaker = breaker.with_state_change_hook(hook.clone());
        }
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::resilience::error::DownstreamError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(clock: &MockClock, failures: u32, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "gateway",
            CircuitBreakerConfig::new(failures, successes, Duration::from_secs(30)),
        )
        .unwrap()
        .with_clock(clock.shared())
    }

    async fn fail(cb: &CircuitBreaker) -> ResilienceResult<(), DownstreamError> {
        cb.execute(|| async { Err(DownstreamError::Network("connection reset".into())) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> ResilienceResult<u32, DownstreamError> {
        cb.execute(|| async { Ok(7) }).await
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::new(0, 1, Duration::from_secs(1)).validate().is_err());
        assert!(CircuitBreakerConfig::new(1, 0, Duration::from_secs(1)).validate().is_err());
        assert!(CircuitBreakerConfig::new(1, 1, Duration::ZERO).validate().is_err());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreaker::new("x", CircuitBreakerConfig::new(0, 1, Duration::from_secs(1))).is_err());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let clock = MockClock::default();
        let cb = breaker(&clock, 3, 1);

        for _ in 0..2 {
            assert!(fail(&cb).await.is_err());
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: ResilienceResult<(), DownstreamError> = cb
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { retry_after_ms: 30_000, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_in_closed_resets_failure_count() {
        let clock = MockClock::default();
        let cb = breaker(&clock, 3, 1);

        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.failure_count(), 2);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.failure_count(), 0);

        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_then_closes() {
        let clock = MockClock::default();
        let cb = breaker(&clock, 1, 2);

        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(29));
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());

        clock.advance(Duration::from_secs(1));
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.success_count(), 1);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        let snap = cb.snapshot();
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.success_count, 0);
        assert!(snap.next_attempt_at.is_none());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_window() {
        let clock = MockClock::default();
        let cb = breaker(&clock, 1, 3);

        fail(&cb).await.ok();
        clock.advance(Duration::from_secs(30));
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.success_count(), 0);
        let snap = cb.snapshot();
        assert_eq!(snap.next_attempt_at, Some(clock.now_ms() + 30_000));
    }

    #[tokio::test]
    async fn test_failure_predicate_excludes_business_errors() {
        let clock = MockClock::default();
        let cb = breaker(&clock, 1, 1).with_failure_predicate(Arc::new(|e| {
            e.downcast_ref::<DownstreamError>()
                .map_or(true, |d| !d.is_business_error())
        }));

        for _ in 0..5 {
            let result: ResilienceResult<(), DownstreamError> = cb
                .execute(|| async { Err(DownstreamError::Declined("insufficient funds".into())) })
                .await;
            assert!(matches!(result, Err(ResilienceError::Operation(DownstreamError::Declined(_)))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);

        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_state_change_hook_sees_every_transition() {
        let clock = MockClock::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = breaker(&clock, 1, 1).with_state_change_hook(Arc::new(move |name, from, to| {
            sink.lock().push((name.to_string(), from, to));
        }));

        fail(&cb).await.ok();
        clock.advance(Duration::from_secs(30));
        succeed(&cb).await.unwrap();

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                ("gateway".to_string(), CircuitState::Closed, CircuitState::Open),
                ("gateway".to_string(), CircuitState::Open, CircuitState::HalfOpen),
                ("gateway".to_string(), CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_lazy_breakers_get_manager_defaults_clock_and_hook() {
        let clock = MockClock::default();
        let transitions = Arc::new(AtomicU32::new(0));
        let counter = transitions.clone();
        let defaults = CircuitBreakerConfig::new(2, 1, Duration::from_secs(15));
        let manager = CircuitBreakerManager::new(defaults)
            .unwrap()
            .with_clock(clock.shared())
            .with_state_change_hook(Arc::new(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        let cb = manager.get_or_create("tax");
        assert_eq!(cb.config(), &defaults);
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().opened_at, Some(clock.now_ms()));

        clock.advance(Duration::from_secs(15));
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(transitions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_manager_register_validates_config() {
        let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default()).unwrap();
        let zero = CircuitBreakerConfig::new(0, 1, Duration::from_secs(1));
        assert!(matches!(manager.register("bad", zero, None), Err(ConfigError::Invalid(_))));
        assert!(manager.get("bad").is_none());
    }

    #[tokio::test]
    async fn test_manager_register_rejects_duplicates() {
        let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default()).unwrap();
        manager
            .register("inventory", CircuitBreakerConfig::default(), None)
            .unwrap();
        let err = manager
            .register("inventory", CircuitBreakerConfig::default(), None)
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateName("inventory".into()));
    }

    #[tokio::test]
    async fn test_manager_lazy_creation_and_reset() {
        let clock = MockClock::default();
        let manager = CircuitBreakerManager::new(CircuitBreakerConfig::new(1, 1, Duration::from_secs(10)))
            .unwrap()
            .with_clock(clock.shared());

        assert!(manager.get("shipping").is_none());
        let result: ResilienceResult<(), DownstreamError> = manager
            .execute("shipping", || async { Err(DownstreamError::Timeout(Duration::from_secs(1))) })
            .await;
        assert!(result.is_err());

        let same = manager.get_or_create("shipping");
        assert_eq!(same.state(), CircuitState::Open);
        assert_eq!(manager.snapshots().len(), 1);

        assert!(manager.reset("shipping"));
        assert_eq!(same.state(), CircuitState::Closed);
        assert!(!manager.reset("unknown"));
    }
}
