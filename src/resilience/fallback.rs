//! Graceful degradation around a primary operation.
//!
//! # Precedence
//! ```text
//! primary ok        → cache result, source = primary
//! fallback disabled → fail with the primary error
//! fallback fn ok    → source = fallback
//! stale cache hit   → source = stale (any age; caller judges staleness)
//! default value     → source = default
//! otherwise         → fail with the primary error
//! ```
//!
//! # Design Decisions
//! - The cache holds one entry per handler and is only written by a
//!   successful primary run
//! - Cached data never expires on its own; `cached_at_ms` is reported so
//!   callers can decide whether to warn users
//! - Handler names are unique per manager and bound to one value type

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crate::clock::{SharedClock, SystemClock};
use crate::observability::metrics;
use crate::resilience::error::ConfigError;

/// Which tier produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackSource {
    Primary,
    Fallback,
    Stale,
    Default,
}

impl FallbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackSource::Primary => "primary",
            FallbackSource::Fallback => "fallback",
            FallbackSource::Stale => "stale",
            FallbackSource::Default => "default",
        }
    }
}

/// Degradation options for one handler.
#[derive(Debug, Clone)]
pub struct FallbackConfig<T> {
    /// When false, a primary failure is returned immediately.
    pub enable_fallback: bool,
    pub use_stale_data: bool,
    pub default_value: Option<T>,
}

impl<T> Default for FallbackConfig<T> {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            use_stale_data: true,
            default_value: None,
        }
    }
}

impl<T> FallbackConfig<T> {
    pub fn with_default(mut self, value: T) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn without_stale_data(mut self) -> Self {
        self.use_stale_data = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enable_fallback = false;
        self
    }
}

/// Last successful primary result.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    pub data: T,
    pub cached_at_ms: u64,
}

/// Result of [`FallbackHandler::execute`].
#[derive(Debug)]
pub struct FallbackOutcome<T, E> {
    pub source: FallbackSource,
    /// Ok with the served data, or the original primary error.
    pub result: Result<T, E>,
    pub is_stale: bool,
    /// When the served stale data was cached.
    pub cached_at_ms: Option<u64>,
}

impl<T, E> FallbackOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// A successful result that did not come from the primary.
    pub fn is_fallback(&self) -> bool {
        self.result.is_ok() && self.source != FallbackSource::Primary
    }

    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Cache state of a registered handler, for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackStatus {
    pub name: String,
    pub has_cached_value: bool,
    pub cached_at_ms: Option<u64>,
}

/// Wraps a primary operation with ordered degradation.
pub struct FallbackHandler<T> {
    name: String,
    config: FallbackConfig<T>,
    cache: RwLock<Option<CachedValue<T>>>,
    clock: SharedClock,
}

impl<T: std::fmt::Debug> std::fmt::Debug for FallbackHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackHandler")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("cache", &*self.cache.read())
            .finish_non_exhaustive()
    }
}

type NoFallback<T, E> = fn() -> std::future::Ready<Result<T, E>>;

impl<T> FallbackHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: FallbackConfig<T>) -> Self {
        Self {
            name: name.into(),
            config,
            cache: RwLock::new(None),
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the primary, degrading to stale data or the default on failure.
    pub async fn execute<P, PF, E>(&self, primary: P) -> FallbackOutcome<T, E>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run(primary, None::<NoFallback<T, E>>).await
    }

    /// Run the primary, trying `fallback` before stale data and the default.
    pub async fn execute_with<P, PF, G, GF, E>(&self, primary: P, fallback: G) -> FallbackOutcome<T, E>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, E>>,
        G: FnOnce() -> GF,
        GF: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run(primary, Some(fallback)).await
    }

    pub fn cached(&self) -> Option<CachedValue<T>> {
        self.cache.read().clone()
    }

    pub fn clear_cache(&self) {
        *self.cache.write() = None;
    }

    pub fn status(&self) -> FallbackStatus {
        let cache = self.cache.read();
        FallbackStatus {
            name: self.name.clone(),
            has_cached_value: cache.is_some(),
            cached_at_ms: cache.as_ref().map(|c| c.cached_at_ms),
        }
    }

    async fn run<P, PF, G, GF, E>(&self, primary: P, fallback: Option<G>) -> FallbackOutcome<T, E>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, E>>,
        G: FnOnce() -> GF,
        GF: Future<Output = Result<T, E>>,
        E: Display,
    {
        let primary_error = match primary().await {
            Ok(data) => {
                *self.cache.write() = Some(CachedValue {
                    data: data.clone(),
                    cached_at_ms: self.clock.now_ms(),
                });
                return FallbackOutcome {
                    source: FallbackSource::Primary,
                    result: Ok(data),
                    is_stale: false,
                    cached_at_ms: None,
                };
            }
            Err(e) => e,
        };

        tracing::warn!(handler = %self.name, error = %primary_error, "Primary operation failed");

        if !self.config.enable_fallback {
            return self.failure(primary_error);
        }

        if let Some(fallback) = fallback {
            match fallback().await {
                Ok(data) => return self.degraded(FallbackSource::Fallback, data, None),
                Err(e) => tracing::warn!(handler = %self.name, error = %e, "Fallback operation failed"),
            }
        }

        if self.config.use_stale_data {
            if let Some(cached) = self.cached() {
                return self.degraded(FallbackSource::Stale, cached.data, Some(cached.cached_at_ms));
            }
        }

        if let Some(default) = &self.config.default_value {
            return self.degraded(FallbackSource::Default, default.clone(), None);
        }

        tracing::error!(handler = %self.name, error = %primary_error, "All degradation tiers failed");
        self.failure(primary_error)
    }

    fn degraded<E>(&self, source: FallbackSource, data: T, cached_at_ms: Option<u64>) -> FallbackOutcome<T, E> {
        metrics::record_fallback(&self.name, source.as_str());
        tracing::info!(handler = %self.name, source = source.as_str(), "Serving degraded result");
        FallbackOutcome {
            source,
            result: Ok(data),
            is_stale: source == FallbackSource::Stale,
            cached_at_ms,
        }
    }

    fn failure<E>(&self, error: E) -> FallbackOutcome<T, E> {
        FallbackOutcome {
            source: FallbackSource::Primary,
            result: Err(error),
            is_stale: false,
            cached_at_ms: None,
        }
    }
}

trait RegisteredHandler: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn status(&self) -> FallbackStatus;
    fn clear_cache(&self);
}

impl<T> RegisteredHandler for FallbackHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn status(&self) -> FallbackStatus {
        FallbackHandler::status(self)
    }

    fn clear_cache(&self) {
        FallbackHandler::clear_cache(self)
    }
}

/// Registry of fallback handlers keyed by name.
pub struct FallbackManager {
    handlers: DashMap<String, Arc<dyn RegisteredHandler>>,
    clock: SharedClock,
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackManager {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Register a new handler; fails if the name is taken.
    pub fn register<T>(&self, name: &str, config: FallbackConfig<T>) -> Result<Arc<FallbackHandler<T>>, ConfigError>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.handlers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ConfigError::DuplicateName(name.to_string())),
            Entry::Vacant(slot) => {
                let handler = Arc::new(FallbackHandler::new(name, config).with_clock(self.clock.clone()));
                slot.insert(handler.clone());
                Ok(handler)
            }
        }
    }

    /// Return the handler for `name`, registering it on first use.
    ///
    /// Fails if the name is already bound to a different value type.
    pub fn get_or_register<T>(&self, name: &str, config: FallbackConfig<T>) -> Result<Arc<FallbackHandler<T>>, ConfigError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let handler = self
            .handlers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(FallbackHandler::new(name, config).with_clock(self.clock.clone()))
                    as Arc<dyn RegisteredHandler>
            })
            .clone();
        handler
            .into_any()
            .downcast::<FallbackHandler<T>>()
            .map_err(|_| ConfigError::TypeMismatch(name.to_string()))
    }

    pub fn get<T>(&self, name: &str) -> Option<Arc<FallbackHandler<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let handler = self.handlers.get(name)?.clone();
        handler.into_any().downcast::<FallbackHandler<T>>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Cache status of every handler, sorted by name.
    pub fn statuses(&self) -> Vec<FallbackStatus> {
        let mut all: Vec<_> = self.handlers.iter().map(|h| h.status()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn clear_all(&self) {
        for handler in self.handlers.iter() {
            handler.clear_cache();
        }
    }
}
