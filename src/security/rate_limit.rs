//! Fixed-window rate limiting keyed by identifier and preset.
//!
//! Each `(scope, identifier)` pair owns one counter and one reset timestamp.
//! When the window has passed, the counter restarts at zero. Windows do not
//! slide: a client can spend a full allowance at the end of one window and
//! another at the start of the next.

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::clock::{SharedClock, SystemClock};
use crate::observability::metrics;
use crate::security::error::SecurityError;
use crate::security::masking::mask_identifier;

/// Window size and allowance for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl RateLimitRule {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }
}

/// Named rule sets for the guarded endpoint families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPreset {
    Auth,
    Payment,
    Webhook,
    Api,
    Checkout,
}

impl RateLimitPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitPreset::Auth => "auth",
            RateLimitPreset::Payment => "payment",
            RateLimitPreset::Webhook => "webhook",
            RateLimitPreset::Api => "api",
            RateLimitPreset::Checkout => "checkout",
        }
    }
}

/// Rule table, one entry per preset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitRules {
    pub auth: RateLimitRule,
    pub payment: RateLimitRule,
    pub webhook: RateLimitRule,
    pub api: RateLimitRule,
    pub checkout: RateLimitRule,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            auth: RateLimitRule::new(15 * 60 * 1000, 5),
            payment: RateLimitRule::new(60 * 1000, 10),
            webhook: RateLimitRule::new(60 * 1000, 100),
            api: RateLimitRule::new(60 * 1000, 100),
            checkout: RateLimitRule::new(60 * 1000, 20),
        }
    }
}

impl RateLimitRules {
    pub fn rule(&self, preset: RateLimitPreset) -> RateLimitRule {
        match preset {
            RateLimitPreset::Auth => self.auth,
            RateLimitPreset::Payment => self.payment,
            RateLimitPreset::Webhook => self.webhook,
            RateLimitPreset::Api => self.api,
            RateLimitPreset::Checkout => self.checkout,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RateLimitPreset, RateLimitRule)> + '_ {
        [
            RateLimitPreset::Auth,
            RateLimitPreset::Payment,
            RateLimitPreset::Webhook,
            RateLimitPreset::Api,
            RateLimitPreset::Checkout,
        ]
        .into_iter()
        .map(move |p| (p, self.rule(p)))
    }
}

/// Which limit to apply: a preset, or an ad-hoc rule under its own scope name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitSpec {
    Preset(RateLimitPreset),
    Custom { scope: String, rule: RateLimitRule },
}

impl From<RateLimitPreset> for LimitSpec {
    fn from(preset: RateLimitPreset) -> Self {
        LimitSpec::Preset(preset)
    }
}

/// Current window state for a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub info: RateLimitInfo,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at_ms: u64,
}

/// Fixed-window request counters.
pub struct RateLimiterService {
    windows: DashMap<(String, String), WindowEntry>,
    rules: ArcSwap<RateLimitRules>,
    clock: SharedClock,
}

impl RateLimiterService {
    pub fn new(rules: RateLimitRules) -> Self {
        Self {
            windows: DashMap::new(),
            rules: ArcSwap::from_pointee(rules),
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Count one request and decide whether it is allowed.
    ///
    /// Rejected requests are not counted.
    pub fn is_within_limit(&self, identifier: &str, limit: impl Into<LimitSpec>) -> RateLimitDecision {
        let (scope, rule) = self.resolve(limit.into());
        let now = self.clock.now_ms();

        let mut entry = self
            .windows
            .entry((scope.clone(), identifier.to_string()))
            .or_insert(WindowEntry {
                count: 0,
                reset_at_ms: now + rule.window_ms,
            });
        if now >= entry.reset_at_ms {
            entry.count = 0;
            entry.reset_at_ms = now + rule.window_ms;
        }

        let allowed = entry.count < rule.max_requests;
        if allowed {
            entry.count += 1;
        }
        let info = RateLimitInfo {
            count: entry.count,
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(entry.count),
            reset_at_ms: entry.reset_at_ms,
        };
        drop(entry);

        if !allowed {
            metrics::record_rate_limited(&scope);
            tracing::warn!(
                scope = %scope,
                identifier = %mask_identifier(identifier),
                limit = rule.max_requests,
                "Rate limit exceeded"
            );
        }
        RateLimitDecision { allowed, info }
    }

    /// Gate form of [`is_within_limit`](Self::is_within_limit).
    pub fn check(&self, identifier: &str, limit: impl Into<LimitSpec>) -> Result<RateLimitInfo, SecurityError> {
        let spec = limit.into();
        let scope = self.resolve(spec.clone()).0;
        let decision = self.is_within_limit(identifier, spec);
        if decision.allowed {
            Ok(decision.info)
        } else {
            Err(SecurityError::RateLimited {
                preset: scope,
                retry_after_ms: decision.info.reset_at_ms.saturating_sub(self.clock.now_ms()),
            })
        }
    }

    /// Window state without counting a request.
    pub fn status(&self, identifier: &str, limit: impl Into<LimitSpec>) -> RateLimitInfo {
        let (scope, rule) = self.resolve(limit.into());
        let now = self.clock.now_ms();
        match self.windows.get(&(scope, identifier.to_string())) {
            Some(entry) if now < entry.reset_at_ms => RateLimitInfo {
                count: entry.count,
                limit: rule.max_requests,
                remaining: rule.max_requests.saturating_sub(entry.count),
                reset_at_ms: entry.reset_at_ms,
            },
            _ => RateLimitInfo {
                count: 0,
                limit: rule.max_requests,
                remaining: rule.max_requests,
                reset_at_ms: now + rule.window_ms,
            },
        }
    }

    pub fn reset(&self, identifier: &str, limit: impl Into<LimitSpec>) {
        let (scope, _) = self.resolve(limit.into());
        self.windows.remove(&(scope, identifier.to_string()));
    }

    /// Drop windows whose reset time has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.windows.len();
        self.windows.retain(|_, entry| now < entry.reset_at_ms);
        before.saturating_sub(self.windows.len())
    }

    /// Swap the rule table; existing windows keep their reset time.
    pub fn reload_rules(&self, rules: RateLimitRules) {
        self.rules.store(Arc::new(rules));
        tracing::info!("Rate limit rules reloaded");
    }

    pub fn rules(&self) -> Arc<RateLimitRules> {
        self.rules.load_full()
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }

    fn resolve(&self, spec: LimitSpec) -> (String, RateLimitRule) {
        match spec {
            LimitSpec::Preset(preset) => (preset.as_str().to_string(), self.rules.load().rule(preset)),
            LimitSpec::Custom { scope, rule } => (scope, rule),
        }
    }
}

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitLayerState {
    pub limiter: Arc<RateLimiterService>,
    pub preset: RateLimitPreset,
}

/// Middleware enforcing a preset per client IP.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitLayerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_ip(&request);
    let decision = state.limiter.is_within_limit(&client, state.preset);

    if decision.allowed {
        let mut response = next.run(request).await;
        apply_headers(response.headers_mut(), &decision.info, None);
        response
    } else {
        let retry_after_ms = decision.info.reset_at_ms.saturating_sub(state.limiter.clock.now_ms());
        let mut response = SecurityError::RateLimited {
            preset: state.preset.as_str().to_string(),
            retry_after_ms,
        }
        .into_response();
        apply_headers(response.headers_mut(), &decision.info, Some(retry_after_ms));
        response
    }
}

/// Best-effort client address: socket peer, then the first X-Forwarded-For hop.
pub fn client_ip(request: &Request<Body>) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, info: &RateLimitInfo, retry_after_ms: Option<u64>) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(info.reset_at_ms / 1000));
    if let Some(ms) = retry_after_ms {
        headers.insert("retry-after", HeaderValue::from(ms.div_ceil(1000)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn limiter() -> (RateLimiterService, MockClock) {
        let clock = MockClock::default();
        (RateLimiterService::new(RateLimitRules::default()).with_clock(clock.shared()), clock)
    }

    #[test]
    fn test_exactly_max_requests_per_window() {
        let (limiter, clock) = limiter();

        for i in 1..=5 {
            let decision = limiter.is_within_limit("203.0.113.7", RateLimitPreset::Auth);
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.info.remaining, 5 - i);
        }
        let rejected = limiter.is_within_limit("203.0.113.7", RateLimitPreset::Auth);
        assert!(!rejected.allowed);
        assert_eq!(rejected.info.count, 5);
        assert_eq!(rejected.info.remaining, 0);

        clock.advance_ms(15 * 60 * 1000);
        for _ in 0..5 {
            assert!(limiter.is_within_limit("203.0.113.7", RateLimitPreset::Auth).allowed);
        }
        assert!(!limiter.is_within_limit("203.0.113.7", RateLimitPreset::Auth).allowed);
    }

    #[test]
    fn test_presets_and_identifiers_are_isolated() {
        let (limiter, _) = limiter();
        for _ in 0..5 {
            limiter.is_within_limit("user-a", RateLimitPreset::Auth);
        }
        assert!(!limiter.is_within_limit("user-a", RateLimitPreset::Auth).allowed);
        assert!(limiter.is_within_limit("user-b", RateLimitPreset::Auth).allowed);
        assert!(limiter.is_within_limit("user-a", RateLimitPreset::Payment).allowed);
    }

    #[test]
    fn test_fixed_window_boundary_burst() {
        let (limiter, clock) = limiter();
        let rule = RateLimitRule::new(1_000, 3);
        let spec = || LimitSpec::Custom { scope: "burst".into(), rule };

        limiter.is_within_limit("c", spec());
        clock.advance_ms(990);
        assert!(limiter.is_within_limit("c", spec()).allowed);
        assert!(limiter.is_within_limit("c", spec()).allowed);
        clock.advance_ms(10);
        // New window right after the boundary: another full allowance.
        for _ in 0..3 {
            assert!(limiter.is_within_limit("c", spec()).allowed);
        }
        assert!(!limiter.is_within_limit("c", spec()).allowed);
    }

    #[test]
    fn test_check_status_reset_and_sweep() {
        let (limiter, clock) = limiter();
        let rule = RateLimitRule::new(1_000, 1);
        let spec = LimitSpec::Custom { scope: "once".into(), rule };

        assert!(limiter.check("x", spec.clone()).is_ok());
        let err = limiter.check("x", spec.clone()).unwrap_err();
        assert!(matches!(err, SecurityError::RateLimited { retry_after_ms: 1_000, .. }));
        assert_eq!(limiter.status("x", spec.clone()).count, 1);

        limiter.reset("x", spec.clone());
        assert_eq!(limiter.status("x", spec.clone()).count, 0);

        limiter.is_within_limit("y", spec.clone());
        limiter.is_within_limit("z", RateLimitPreset::Api);
        clock.advance_ms(1_000);
        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_windows(), 1);
    }

    #[test]
    fn test_reload_rules() {
        let (limiter, _) = limiter();
        let mut rules = RateLimitRules::default();
        rules.checkout = RateLimitRule::new(60_000, 1);
        limiter.reload_rules(rules);

        assert!(limiter.is_within_limit("cart-1", RateLimitPreset::Checkout).allowed);
        assert!(!limiter.is_within_limit("cart-1", RateLimitPreset::Checkout).allowed);
        assert_eq!(limiter.rules().checkout.max_requests, 1);
    }
}
