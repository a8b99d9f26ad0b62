//! Bearer-token authentication for the admin API.
//!
//! Failed tokens count as failed logins for `admin-api:<ip>`, so the usual
//! lockout and IP block apply to anyone guessing the key.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use crate::http::server::AppState;
use crate::security::masking::mask_ip;
use crate::security::rate_limit::client_ip;

pub async fn admin_auth_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let services = &state.services;
    let ip = client_ip(&request);
    let identity = format!("admin-api:{ip}");

    if let Err(e) = services.brute_force.check_login_allowed(&identity, &ip) {
        return e.into_response();
    }

    let authorized = bearer_token(request.headers())
        .is_some_and(|token| keys_match(token, &services.config.admin.api_key));

    if authorized {
        services.brute_force.record_successful_login(&identity);
        return next.run(request).await;
    }

    let outcome = services.brute_force.record_failed_attempt(&identity, &ip);
    tracing::warn!(
        ip = %mask_ip(&ip),
        attempts_remaining = outcome.attempts_remaining,
        locked = outcome.locked,
        "Admin authentication failed"
    );
    StatusCode::UNAUTHORIZED.into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Compares digests so timing does not reveal a matching key prefix.
fn keys_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("s3cret"));
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("s3cret", "s3cret"));
        assert!(!keys_match("s3cre", "s3cret"));
    }
}
