//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap downstream calls with a deadline
//! - Cancel operations cleanly on timeout (the future is dropped)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out downstream call becomes `DownstreamError::Timeout`, which is
//!   transient: the retry layer retries it and the breaker counts it

use std::future::Future;
use std::time::Duration;

use crate::resilience::error::DownstreamError;

/// Bound a downstream call, mapping expiry to a transient `DownstreamError`.
pub async fn with_timeout<T, Fut>(limit: Duration, call: Fut) -> Result<T, DownstreamError>
where
    Fut: Future<Output = Result<T, DownstreamError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DownstreamError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_to_transient_error() {
        let result: Result<(), DownstreamError> = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err, DownstreamError::Timeout(Duration::from_millis(50)));
        assert!(err.is_transient());
    }
}
