//! Concurrency checks: shared counters must hold their limits when many tasks
//! hit them at once.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use futures_util::future::join_all;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use checkout_guard::clock::Clock;
use checkout_guard::http::build_router;
use checkout_guard::http::server::WEBHOOK_PATH;
use checkout_guard::security::replay::generate_nonce;
use checkout_guard::security::RateLimitPreset;
use checkout_guard::webhooks::signature::sign;
use checkout_guard::webhooks::SIGNATURE_HEADER;

use common::{harness, WEBHOOK_SECRET};

const TASKS: usize = 64;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rate_limit_admits_exactly_the_limit() {
    let h = harness();
    let limiter = h.services.rate_limiter.clone();
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            tokio::spawn(async move {
                if limiter.is_within_limit("198.51.100.7", RateLimitPreset::Checkout).allowed {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap();
    }

    // Checkout preset: 20 per minute.
    assert_eq!(admitted.load(Ordering::SeqCst), 20);
    assert!(limiter.is_within_limit("198.51.100.8", RateLimitPreset::Checkout).allowed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_lock_the_account_once() {
    let h = harness();
    let brute_force = h.services.brute_force.clone();
    let lockouts = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let brute_force = brute_force.clone();
            let lockouts = lockouts.clone();
            tokio::spawn(async move {
                let outcome = brute_force.record_failed_attempt("carol@example.com", "192.0.2.44");
                // Only the attempt that triggers the lockout reports an unblocked IP.
                if outcome.locked && !outcome.ip_blocked {
                    lockouts.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap();
    }

    assert!(brute_force.is_account_locked("carol@example.com"));
    assert_eq!(brute_force.locked_accounts().len(), 1);
    assert!(brute_force.is_ip_blocked("192.0.2.44"));
    assert_eq!(lockouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nonce_is_accepted_by_exactly_one_racer() {
    let h = harness();
    let replay = h.services.replay.clone();
    let nonce = generate_nonce();
    let now = h.clock.now_ms();
    let accepted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let replay = replay.clone();
            let nonce = nonce.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                if replay.validate_freshness(&nonce, now).valid {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap();
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redeliveries_are_handled_once() {
    let h = harness();
    let app = build_router(h.services.clone());
    let body = br#"{"id":"evt_race","type":"charge.succeeded","data":{"object":{"id":"pi_race"}}}"#.to_vec();
    let signature = sign(WEBHOOK_SECRET.as_bytes(), h.clock.now_ms() / 1000, &body).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let app = app.clone();
            let request = Request::post(WEBHOOK_PATH)
                .header("x-forwarded-for", "203.0.113.60")
                .header(SIGNATURE_HEADER, signature.clone())
                .body(Body::from(body.clone()))
                .unwrap();
            tokio::spawn(async move { app.oneshot(request).await.unwrap().status() })
        })
        .collect();
    for status in join_all(handles).await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    assert_eq!(h.services.webhooks.processed_count(), 1);
    assert!(h.services.webhooks.retry_queue().is_empty());
}

#[tokio::test]
async fn test_webhook_flood_is_throttled_per_ip() {
    let h = harness();
    let app = build_router(h.services.clone());

    let mut throttled = 0;
    for i in 0..110 {
        let request = Request::post(WEBHOOK_PATH)
            .header("x-forwarded-for", "203.0.113.70")
            .body(Body::from(format!(r#"{{"id":"evt_{i}","type":"ping"}}"#)))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            throttled += 1;
        }
    }

    // Webhook preset: 100 per minute.
    assert_eq!(throttled, 10);
}
