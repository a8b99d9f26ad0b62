//! Replay and duplicate-request protection.
//!
//! # Responsibilities
//! - Reject requests whose timestamp is outside the tolerance window
//! - Reject any nonce presented a second time
//! - Count identical `(identifier, request hash)` pairs and cap client retry storms
//!
//! # Design Decisions
//! - Nonce check-and-record is one atomic map operation; two racing requests
//!   with the same nonce cannot both pass
//! - Used nonces outlive the timestamp tolerance, so a nonce can never be
//!   replayed with a fresh timestamp while it is still remembered

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::clock::{SharedClock, SystemClock};
use crate::observability::metrics;
use crate::resilience::ConfigError;
use crate::security::error::SecurityError;
use crate::security::masking::mask_identifier;

pub const NONCE_HEADER: &str = "x-nonce";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

pub const REASON_NONCE_USED: &str = "Nonce already used";
pub const REASON_TIMESTAMP: &str = "Timestamp outside tolerance window";
pub const REASON_MISSING_NONCE: &str = "Missing nonce";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub tolerance_ms: u64,
    pub nonce_ttl_ms: u64,
    pub duplicate_window_ms: u64,
    pub max_duplicates: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 5 * 60 * 1000,
            nonce_ttl_ms: 60 * 60 * 1000,
            duplicate_window_ms: 5 * 60 * 1000,
            max_duplicates: 3,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tolerance_ms == 0 || self.duplicate_window_ms == 0 {
            return Err(ConfigError::Invalid("replay windows must be > 0".into()));
        }
        // Timestamps are accepted on both sides of `now`, so a nonce must be
        // remembered for the full width of the window.
        if self.nonce_ttl_ms < self.tolerance_ms.saturating_mul(2) {
            return Err(ConfigError::Invalid(
                "replay.nonce_ttl_ms must be >= 2 * replay.tolerance_ms".into(),
            ));
        }
        if self.max_duplicates < 1 {
            return Err(ConfigError::Invalid("replay.max_duplicates must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshnessCheck {
    pub valid: bool,
    pub reason: Option<String>,
}

impl FreshnessCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub count: u32,
    pub allowed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySweep {
    pub nonces: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy)]
struct DuplicateRecord {
    window_start_ms: u64,
    count: u32,
}

pub struct ReplayAttackProtectionService {
    config: ReplayConfig,
    nonces: DashMap<String, u64>,
    duplicates: DashMap<(String, String), DuplicateRecord>,
    clock: SharedClock,
}

impl ReplayAttackProtectionService {
    pub fn new(config: ReplayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            nonces: DashMap::new(),
            duplicates: DashMap::new(),
            clock: SystemClock::shared(),
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Check the timestamp window, then consume the nonce.
    pub fn validate_freshness(&self, nonce: &str, timestamp_ms: u64) -> FreshnessCheck {
        if nonce.is_empty() {
            metrics::record_replay_rejection("missing_nonce");
            return FreshnessCheck::rejected(REASON_MISSING_NONCE);
        }

        let now = self.clock.now_ms();
        if now.abs_diff(timestamp_ms) > self.config.tolerance_ms {
            metrics::record_replay_rejection("stale_timestamp");
            tracing::warn!(skew_ms = now.abs_diff(timestamp_ms), "Request timestamp outside tolerance");
            return FreshnessCheck::rejected(REASON_TIMESTAMP);
        }

        match self.nonces.entry(nonce.to_string()) {
            Entry::Occupied(_) => {
                metrics::record_replay_rejection("nonce_reused");
                tracing::warn!(nonce = %mask_identifier(nonce), "Replay detected: nonce already used");
                FreshnessCheck::rejected(REASON_NONCE_USED)
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                FreshnessCheck::ok()
            }
        }
    }

    /// Count occurrences of an identical request inside the duplicate window.
    pub fn detect_duplicate(&self, identifier: &str, request_hash: &str) -> DuplicateCheck {
        let now = self.clock.now_ms();
        let window = self.config.duplicate_window_ms;
        let mut record = self
            .duplicates
            .entry((identifier.to_string(), request_hash.to_string()))
            .or_insert(DuplicateRecord {
                window_start_ms: now,
                count: 0,
            });
        if now >= record.window_start_ms + window {
            record.window_start_ms = now;
            record.count = 0;
        }
        record.count += 1;
        let count = record.count;
        drop(record);

        let allowed = count <= self.config.max_duplicates;
        if !allowed {
            metrics::record_replay_rejection("duplicate");
            tracing::warn!(
                identifier = %mask_identifier(identifier),
                count,
                "Duplicate request limit exceeded"
            );
        }
        DuplicateCheck {
            is_duplicate: count > 1,
            count,
            allowed,
        }
    }

    /// Gate form of [`validate_freshness`](Self::validate_freshness).
    pub fn check_freshness(&self, nonce: &str, timestamp_ms: u64) -> Result<(), SecurityError> {
        let check = self.validate_freshness(nonce, timestamp_ms);
        match check.reason {
            Some(reason) if !check.valid => Err(SecurityError::Replay(reason)),
            _ => Ok(()),
        }
    }

    /// Gate form of [`detect_duplicate`](Self::detect_duplicate).
    pub fn check_duplicate(&self, identifier: &str, request_hash: &str) -> Result<DuplicateCheck, SecurityError> {
        let check = self.detect_duplicate(identifier, request_hash);
        if check.allowed {
            Ok(check)
        } else {
            Err(SecurityError::DuplicateRequest { count: check.count })
        }
    }

    pub fn sweep_expired(&self) -> ReplaySweep {
        let now = self.clock.now_ms();
        let ttl = self.config.nonce_ttl_ms;
        let window = self.config.duplicate_window_ms;

        let nonces_before = self.nonces.len();
        // Inclusive: a timestamp exactly at the window edge is still accepted.
        self.nonces.retain(|_, seen_at| now <= *seen_at + ttl);
        let dup_before = self.duplicates.len();
        self.duplicates.retain(|_, r| now < r.window_start_ms + window);

        ReplaySweep {
            nonces: nonces_before.saturating_sub(self.nonces.len()),
            duplicates: dup_before.saturating_sub(self.duplicates.len()),
        }
    }

    pub fn tracked_nonces(&self) -> usize {
        self.nonces.len()
    }
}

/// Random single-use nonce for outbound requests.
pub fn generate_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// SHA-256 hex digest identifying a request for duplicate detection.
pub fn hash_request(method: &str, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Middleware requiring `X-Nonce` and `X-Timestamp` (epoch milliseconds).
pub async fn replay_protection_middleware(
    State(replay): State<Arc<ReplayAttackProtectionService>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Owned copies: the request borrow must end before `next.run`.
    let (nonce, timestamp) = {
        let headers = request.headers();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        (
            header(NONCE_HEADER).map(str::to_owned).unwrap_or_default(),
            header(TIMESTAMP_HEADER).and_then(|v| v.parse::<u64>().ok()),
        )
    };

    let Some(timestamp_ms) = timestamp else {
        metrics::record_replay_rejection("missing_timestamp");
        return SecurityError::Replay("Missing or invalid timestamp".into()).into_response();
    };
    match replay.check_freshness(&nonce, timestamp_ms) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};

    fn service() -> (ReplayAttackProtectionService, MockClock) {
        let clock = MockClock::default();
        let svc = ReplayAttackProtectionService::new(ReplayConfig::default())
            .unwrap()
            .with_clock(clock.shared());
        (svc, clock)
    }

    #[test]
    fn test_same_nonce_twice_is_rejected() {
        let (svc, clock) = service();
        let now = clock.now_ms();
        assert!(svc.validate_freshness("n-1", now).valid);

        let second = svc.validate_freshness("n-1", now);
        assert!(!second.valid);
        assert_eq!(second.reason.as_deref(), Some(REASON_NONCE_USED));
    }

    #[test]
    fn test_timestamp_tolerance() {
        let (svc, clock) = service();
        let now = clock.now_ms();
        assert!(svc.validate_freshness("past-edge", now - 5 * 60 * 1000).valid);
        assert!(svc.validate_freshness("future-edge", now + 5 * 60 * 1000).valid);

        let stale = svc.validate_freshness("stale", now - 5 * 60 * 1000 - 1);
        assert_eq!(stale.reason.as_deref(), Some(REASON_TIMESTAMP));
        // A rejected timestamp does not burn the nonce.
        assert!(svc.validate_freshness("stale", now).valid);
    }

    #[test]
    fn test_missing_nonce() {
        let (svc, clock) = service();
        assert!(matches!(
            svc.check_freshness("", clock.now_ms()),
            Err(SecurityError::Replay(reason)) if reason == REASON_MISSING_NONCE
        ));
    }

    #[test]
    fn test_duplicate_allowance() {
        let (svc, clock) = service();
        let hash = hash_request("POST", "/checkout", b"{}");

        let first = svc.detect_duplicate("cart-9", &hash);
        assert_eq!(first, DuplicateCheck { is_duplicate: false, count: 1, allowed: true });
        assert!(svc.detect_duplicate("cart-9", &hash).allowed);
        assert!(svc.detect_duplicate("cart-9", &hash).allowed);
        let fourth = svc.detect_duplicate("cart-9", &hash);
        assert!(fourth.is_duplicate);
        assert!(!fourth.allowed);
        assert!(matches!(
            svc.check_duplicate("cart-9", &hash),
            Err(SecurityError::DuplicateRequest { count: 5 })
        ));

        assert!(svc.detect_duplicate("cart-10", &hash).allowed);

        clock.advance_ms(5 * 60 * 1000);
        assert_eq!(svc.detect_duplicate("cart-9", &hash).count, 1);
    }

    #[test]
    fn test_sweep_expires_nonces() {
        let (svc, clock) = service();
        svc.validate_freshness("old", clock.now_ms());
        svc.detect_duplicate("id", "h");
        clock.advance_ms(60 * 60 * 1000);
        assert_eq!(svc.sweep_expired().nonces, 0);
        clock.advance_ms(1);
        let sweep = svc.sweep_expired();
        assert_eq!(sweep, ReplaySweep { nonces: 1, duplicates: 1 });
        assert_eq!(svc.tracked_nonces(), 0);
    }

    #[test]
    fn test_nonce_ttl_must_cover_both_sides_of_the_window() {
        let short = ReplayConfig {
            tolerance_ms: 300_000,
            nonce_ttl_ms: 300_000,
            ..ReplayConfig::default()
        };
        assert!(matches!(short.validate(), Err(ConfigError::Invalid(_))));
        assert!(ReplayAttackProtectionService::new(short).is_err());

        let bound = ReplayConfig {
            nonce_ttl_ms: 600_000,
            ..short
        };
        assert!(bound.validate().is_ok());
        assert!(ReplayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_future_dated_nonce_cannot_be_replayed_after_sweep() {
        let clock = MockClock::default();
        let config = ReplayConfig {
            tolerance_ms: 300_000,
            nonce_ttl_ms: 600_000,
            ..ReplayConfig::default()
        };
        let svc = ReplayAttackProtectionService::new(config)
            .unwrap()
            .with_clock(clock.shared());
        let timestamp = clock.now_ms() + 300_000;
        assert!(svc.validate_freshness("n-edge", timestamp).valid);

        // Walk the clock to the last instant the timestamp is still accepted.
        for step_ms in [301_000, 60_000, 239_000] {
            clock.advance_ms(step_ms);
            svc.sweep_expired();
            let again = svc.validate_freshness("n-edge", timestamp);
            assert_eq!(again.reason.as_deref(), Some(REASON_NONCE_USED));
        }

        clock.advance_ms(1);
        svc.sweep_expired();
        let expired = svc.validate_freshness("n-edge", timestamp);
        assert_eq!(expired.reason.as_deref(), Some(REASON_TIMESTAMP));
    }

    mod middleware {
        use super::*;
        use axum::{http::StatusCode, middleware::from_fn_with_state, routing::post, Router};
        use tower::ServiceExt;

        fn app(replay: Arc<ReplayAttackProtectionService>) -> Router {
            Router::new()
                .route("/mutate", post(|| async { "done" }))
                .route_layer(from_fn_with_state(replay, replay_protection_middleware))
        }

        fn request(nonce: Option<&str>, timestamp: Option<u64>) -> Request<Body> {
            let mut builder = Request::post("/mutate");
            if let Some(nonce) = nonce {
                builder = builder.header(NONCE_HEADER, nonce);
            }
            if let Some(ts) = timestamp {
                builder = builder.header(TIMESTAMP_HEADER, ts.to_string());
            }
            builder.body(Body::empty()).unwrap()
        }

        #[tokio::test]
        async fn test_headers_gate_the_inner_handler() {
            let (svc, clock) = service();
            let now = clock.now_ms();
            let router = app(Arc::new(svc));

            let ok = router.clone().oneshot(request(Some("n-http"), Some(now))).await.unwrap();
            assert_eq!(ok.status(), StatusCode::OK);

            let replayed = router.clone().oneshot(request(Some("n-http"), Some(now))).await.unwrap();
            assert_ne!(replayed.status(), StatusCode::OK);

            let no_timestamp = router.clone().oneshot(request(Some("n-2"), None)).await.unwrap();
            assert_ne!(no_timestamp.status(), StatusCode::OK);

            let no_nonce = router.oneshot(request(None, Some(now))).await.unwrap();
            assert_ne!(no_nonce.status(), StatusCode::OK);
        }

        #[test]
        fn test_middleware_future_is_send() {
            fn assert_send<T: Send>(_: &T) {}
            let (svc, _) = service();
            let router = app(Arc::new(svc));
            assert_send(&router.oneshot(request(Some("n"), Some(0))));
        }
    }

    #[test]
    fn test_hash_and_nonce_shape() {
        let a = hash_request("POST", "/pay", b"{\"amount\":100}");
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_request("POST", "/pay", b"{\"amount\":101}"));
        assert_ne!(generate_nonce(), generate_nonce());
    }
}
