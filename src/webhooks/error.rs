use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("missing webhook signature")]
    MissingSignature,

    #[error("malformed webhook signature: {0}")]
    MalformedSignature(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("webhook signature timestamp outside tolerance ({skew_secs}s skew)")]
    SignatureExpired { skew_secs: u64 },

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// The business handler failed; the event is eligible for retry.
    #[error("webhook handler failed: {0}")]
    Handler(String),
}

impl WebhookError {
    /// Signature and payload errors mean the delivery itself cannot be trusted.
    pub fn is_verification_error(&self) -> bool {
        !matches!(self, WebhookError::Handler(_))
    }
}
