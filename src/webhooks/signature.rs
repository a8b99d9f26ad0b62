//! HMAC-SHA256 webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>`. The MAC covers
//! `"{t}.{body}"`, so a captured body cannot be replayed under a new timestamp.
//! Several `v1` entries may be present during secret rotation; any match passes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::webhooks::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub timestamp_secs: u64,
    pub signatures: Vec<Vec<u8>>,
}

pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| WebhookError::MalformedSignature(format!("bad timestamp '{value}'")))?;
                timestamp = Some(secs);
            }
            "v1" => {
                let bytes = hex::decode(value)
                    .map_err(|_| WebhookError::MalformedSignature("v1 is not hex".into()))?;
                signatures.push(bytes);
            }
            _ => {}
        }
    }

    let timestamp_secs = timestamp.ok_or_else(|| WebhookError::MalformedSignature("missing t=".into()))?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedSignature("missing v1=".into()));
    }
    Ok(ParsedSignature {
        timestamp_secs,
        signatures,
    })
}

fn mac_for(secret: &[u8], timestamp_secs: u64, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| WebhookError::MalformedSignature(format!("unusable secret: {e}")))?;
    mac.update(timestamp_secs.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Produce a header value for `body` signed at `timestamp_secs`.
pub fn sign(secret: &[u8], timestamp_secs: u64, body: &[u8]) -> Result<String, WebhookError> {
    let tag = mac_for(secret, timestamp_secs, body)?.finalize().into_bytes();
    Ok(format!("t={timestamp_secs},v1={}", hex::encode(tag)))
}

/// Verify a signature header against `body`.
///
/// Tag comparison is constant-time.
pub fn verify(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now_ms: u64,
    tolerance_ms: u64,
) -> Result<(), WebhookError> {
    let parsed = parse_signature_header(header)?;

    let skew_ms = now_ms.abs_diff(parsed.timestamp_secs.saturating_mul(1000));
    if skew_ms > tolerance_ms {
        return Err(WebhookError::SignatureExpired {
            skew_secs: skew_ms / 1000,
        });
    }

    let mac = mac_for(secret, parsed.timestamp_secs, body)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"whsec_test";
    const NOW_MS: u64 = 1_704_067_200_000;

    #[test]
    fn test_sign_then_verify() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign(SECRET, NOW_MS / 1000, body).unwrap();
        assert!(header.starts_with("t=1704067200,v1="));
        assert!(verify(SECRET, &header, body, NOW_MS, 300_000).is_ok());
    }

    #[test]
    fn test_tampered_body_or_secret() {
        let header = sign(SECRET, NOW_MS / 1000, b"original").unwrap();
        assert_eq!(
            verify(SECRET, &header, b"tampered", NOW_MS, 300_000),
            Err(WebhookError::InvalidSignature)
        );
        assert_eq!(
            verify(b"other", &header, b"original", NOW_MS, 300_000),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_timestamp() {
        let header = sign(SECRET, NOW_MS / 1000 - 301, b"x").unwrap();
        assert!(matches!(
            verify(SECRET, &header, b"x", NOW_MS, 300_000),
            Err(WebhookError::SignatureExpired { skew_secs: 301 })
        ));
    }

    #[test]
    fn test_rotation_accepts_any_v1() {
        let good = sign(SECRET, NOW_MS / 1000, b"x").unwrap();
        let tag = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={tag}", NOW_MS / 1000, "00".repeat(32));
        assert!(verify(SECRET, &header, b"x", NOW_MS, 300_000).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(parse_signature_header("v1=abcd"), Err(WebhookError::MalformedSignature(_))));
        assert!(matches!(parse_signature_header("t=1"), Err(WebhookError::MalformedSignature(_))));
        assert!(matches!(parse_signature_header("t=x,v1=ab"), Err(WebhookError::MalformedSignature(_))));
        assert!(matches!(parse_signature_header("t=1,v1=zz"), Err(WebhookError::MalformedSignature(_))));
    }
}
