//! Error taxonomy for downstream calls.
//!
//! # Categories
//! - Transient: network, timeout, HTTP 5xx and 429. Retried automatically.
//! - Business: declined payments, invalid input. Surfaced immediately, never
//!   retried, excluded from breaker accounting when filtered.
//! - Circuit open: synthetic rejection raised without touching the dependency.

use std::time::Duration;
use thiserror::Error;

/// Result alias for operations guarded by a breaker or timeout.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Errors produced by the resilience wrappers around a user operation.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker rejected the call without invoking the dependency.
    #[error("service unavailable: circuit '{name}' is open (retry in {retry_after_ms}ms)")]
    CircuitOpen { name: String, retry_after_ms: u64 },

    /// The wrapped operation itself failed.
    #[error(transparent)]
    Operation(E),
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// The underlying operation error, if the failure came from the operation.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure reported by a downstream dependency (gateway, inventory, shipping, tax).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownstreamError {
    /// Connection refused/reset, DNS failure, socket hang up.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status from the dependency.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Business rejection (e.g. card declined). Never retried.
    #[error("declined: {0}")]
    Declined(String),

    /// The request was malformed. Never retried.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl DownstreamError {
    /// Network failures, timeouts, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            DownstreamError::Network(_) | DownstreamError::Timeout(_) => true,
            DownstreamError::Http { status, .. } => *status >= 500 || *status == 429,
            DownstreamError::Declined(_) | DownstreamError::Invalid(_) => false,
        }
    }

    /// Business outcomes say nothing about the dependency's health.
    pub fn is_business_error(&self) -> bool {
        matches!(self, DownstreamError::Declined(_) | DownstreamError::Invalid(_))
    }
}

/// Invalid resilience configuration, rejected at construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A name was registered twice in a manager.
    #[error("'{0}' is already registered")]
    DuplicateName(String),

    /// A name was reused with a different value type.
    #[error("'{0}' is registered with a different value type")]
    TypeMismatch(String),
}
