//! Security rejection taxonomy.
//!
//! Every variant denies the request outright; none is ever retried.
//! Identifiers carried here are already masked.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::security::validation::ValidationError;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("rate limit exceeded for {preset}, retry in {retry_after_ms}ms")]
    RateLimited { preset: String, retry_after_ms: u64 },

    #[error("account {identifier} is locked")]
    AccountLocked { identifier: String, until_ms: u64 },

    #[error("IP {ip} is blocked")]
    IpBlocked { ip: String, until_ms: u64 },

    #[error("replay rejected: {0}")]
    Replay(String),

    #[error("duplicate request limit exceeded ({count} occurrences)")]
    DuplicateRequest { count: u32 },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SecurityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SecurityError::RateLimited { .. } | SecurityError::DuplicateRequest { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            SecurityError::AccountLocked { .. } => StatusCode::LOCKED,
            SecurityError::IpBlocked { .. } => StatusCode::FORBIDDEN,
            SecurityError::Replay(_) => StatusCode::BAD_REQUEST,
            SecurityError::Validation(ValidationError::BodyTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            SecurityError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let limited = SecurityError::RateLimited { preset: "auth".into(), retry_after_ms: 1000 };
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            SecurityError::AccountLocked { identifier: "al***".into(), until_ms: 0 }.status_code(),
            StatusCode::LOCKED
        );
        assert_eq!(
            SecurityError::IpBlocked { ip: "10.0.x.x".into(), until_ms: 0 }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(SecurityError::Replay("Nonce already used".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            SecurityError::from(ValidationError::BodyTooLarge { size: 10, limit: 5 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
