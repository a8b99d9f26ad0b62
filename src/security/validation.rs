//! Request payload guards.
//!
//! # Responsibilities
//! - Bound body size before parsing
//! - Bound JSON nesting depth, string length, array length and object width
//! - Reject prototype-pollution keys (`__proto__`, `constructor`, `prototype`)
//! - Field-level validators for the checkout surface (email, UUID, amount, currency)
//!
//! The service is stateless; it can be shared freely.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::observability::metrics;

const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Largest accepted amount in minor units (999,999.99).
pub const MAX_AMOUNT_MINOR: i64 = 99_999_999;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("JSON nesting exceeds depth {limit}")]
    TooDeep { limit: usize },

    #[error("string at '{path}' has {len} characters, limit is {limit}")]
    StringTooLong { path: String, len: usize, limit: usize },

    #[error("array at '{path}' has {len} items, limit is {limit}")]
    ArrayTooLong { path: String, len: usize, limit: usize },

    #[error("object at '{path}' has {count} keys, limit is {limit}")]
    TooManyKeys { path: String, count: usize, limit: usize },

    #[error("forbidden key '{key}' at '{path}'")]
    ForbiddenKey { path: String, key: String },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

impl ValidationError {
    fn rule(&self) -> &'static str {
        match self {
            ValidationError::BodyTooLarge { .. } => "body_size",
            ValidationError::MalformedJson(_) => "malformed",
            ValidationError::TooDeep { .. } => "depth",
            ValidationError::StringTooLong { .. } => "string_length",
            ValidationError::ArrayTooLong { .. } => "array_length",
            ValidationError::TooManyKeys { .. } => "object_keys",
            ValidationError::ForbiddenKey { .. } => "forbidden_key",
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::InvalidField { .. } => "invalid_field",
        }
    }

    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationLimits {
    pub max_body_bytes: usize,
    pub max_depth: usize,
    pub max_string_length: usize,
    pub max_array_length: usize,
    pub max_object_keys: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024,
            max_depth: 10,
            max_string_length: 10_000,
            max_array_length: 1_000,
            max_object_keys: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestValidationService {
    limits: ValidationLimits,
}

impl RequestValidationService {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Size check, parse, then structural validation.
    pub fn validate_body(&self, body: &[u8]) -> Result<Value, ValidationError> {
        let result = self.check_body(body);
        if let Err(e) = &result {
            metrics::record_validation_rejection(e.rule());
            tracing::warn!(rule = e.rule(), error = %e, "Request payload rejected");
        }
        result
    }

    fn check_body(&self, body: &[u8]) -> Result<Value, ValidationError> {
        if body.len() > self.limits.max_body_bytes {
            return Err(ValidationError::BodyTooLarge {
                size: body.len(),
                limit: self.limits.max_body_bytes,
            });
        }
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ValidationError::MalformedJson(e.to_string()))?;
        self.walk(&value, "$", 1)?;
        Ok(value)
    }

    /// Structural validation of an already parsed document.
    pub fn validate_json(&self, value: &Value) -> Result<(), ValidationError> {
        self.walk(value, "$", 1).inspect_err(|e| {
            metrics::record_validation_rejection(e.rule());
        })
    }

    fn walk(&self, value: &Value, path: &str, depth: usize) -> Result<(), ValidationError> {
        match value {
            Value::String(s) => {
                let len = s.chars().count();
                if len > self.limits.max_string_length {
                    return Err(ValidationError::StringTooLong {
                        path: path.to_string(),
                        len,
                        limit: self.limits.max_string_length,
                    });
                }
            }
            Value::Array(items) => {
                self.check_depth(depth)?;
                if items.len() > self.limits.max_array_length {
                    return Err(ValidationError::ArrayTooLong {
                        path: path.to_string(),
                        len: items.len(),
                        limit: self.limits.max_array_length,
                    });
                }
                for (i, item) in items.iter().enumerate() {
                    self.walk(item, &format!("{path}[{i}]"), depth + 1)?;
                }
            }
            Value::Object(map) => {
                self.check_depth(depth)?;
                if map.len() > self.limits.max_object_keys {
                    return Err(ValidationError::TooManyKeys {
                        path: path.to_string(),
                        count: map.len(),
                        limit: self.limits.max_object_keys,
                    });
                }
                for (key, child) in map {
                    if FORBIDDEN_KEYS.contains(&key.as_str()) {
                        return Err(ValidationError::ForbiddenKey {
                            path: path.to_string(),
                            key: key.clone(),
                        });
                    }
                    self.walk(child, &format!("{path}.{key}"), depth + 1)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_depth(&self, depth: usize) -> Result<(), ValidationError> {
        if depth > self.limits.max_depth {
            Err(ValidationError::TooDeep {
                limit: self.limits.max_depth,
            })
        } else {
            Ok(())
        }
    }

    /// Strip control characters (newline and tab survive), trim, and cap length.
    pub fn sanitize_string(&self, input: &str) -> String {
        input
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect::<String>()
            .trim()
            .chars()
            .take(self.limits.max_string_length)
            .collect()
    }
}

/// Every listed top-level field must be present and non-null.
pub fn require_fields(value: &Value, fields: &[&str]) -> Result<(), ValidationError> {
    for field in fields {
        match value.get(*field) {
            None | Some(Value::Null) => return Err(ValidationError::MissingField((*field).to_string())),
            Some(_) => {}
        }
    }
    Ok(())
}

pub fn validate_email(field: &str, email: &str) -> Result<(), ValidationError> {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(ValidationError::invalid(field, "not a valid email address"));
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ValidationError::invalid(field, "not a valid email address"));
    };
    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if local.is_empty() || local.len() > 64 || !domain_ok {
        return Err(ValidationError::invalid(field, "not a valid email address"));
    }
    Ok(())
}

pub fn validate_uuid(field: &str, value: &str) -> Result<uuid::Uuid, ValidationError> {
    uuid::Uuid::parse_str(value).map_err(|_| ValidationError::invalid(field, "not a valid UUID"))
}

/// Amounts are integer minor units: positive and at most [`MAX_AMOUNT_MINOR`].
pub fn validate_amount(field: &str, amount_minor: i64) -> Result<(), ValidationError> {
    if amount_minor <= 0 {
        return Err(ValidationError::invalid(field, "amount must be positive"));
    }
    if amount_minor > MAX_AMOUNT_MINOR {
        return Err(ValidationError::invalid(field, "amount exceeds maximum"));
    }
    Ok(())
}

/// Three-letter uppercase ISO 4217 code.
pub fn validate_currency(field: &str, code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::invalid(field, "not an ISO 4217 currency code"))
    }
}

/// Longest accepted region or state name.
pub const MAX_REGION_LEN: usize = 64;

/// Two-letter uppercase ISO 3166-1 alpha-2 code.
pub fn validate_country(field: &str, code: &str) -> Result<(), ValidationError> {
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::invalid(field, "not an ISO 3166-1 alpha-2 country code"))
    }
}

/// Region or state: letters, digits, spaces, `-` and `.`, at most [`MAX_REGION_LEN`] bytes.
pub fn validate_region(field: &str, region: &str) -> Result<(), ValidationError> {
    if region.trim().is_empty() {
        return Err(ValidationError::invalid(field, "must not be blank"));
    }
    if region.len() > MAX_REGION_LEN {
        return Err(ValidationError::invalid(field, "too long"));
    }
    if !region.chars().all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '.')) {
        return Err(ValidationError::invalid(field, "contains unsupported characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> RequestValidationService {
        RequestValidationService::default()
    }

    #[test]
    fn test_accepts_ordinary_payload() {
        let body = br#"{"orderId":"o-1","items":[{"sku":"A","qty":2}],"email":"a@b.co"}"#;
        let value = service().validate_body(body).unwrap();
        assert_eq!(value["items"][0]["qty"], 2);
    }

    #[test]
    fn test_body_size_checked_before_parse() {
        let svc = RequestValidationService::new(ValidationLimits {
            max_body_bytes: 8,
            ..Default::default()
        });
        let err = svc.validate_body(b"not even json at all").unwrap_err();
        assert_eq!(err, ValidationError::BodyTooLarge { size: 20, limit: 8 });
    }

    #[test]
    fn test_forbidden_keys_anywhere() {
        let err = service()
            .validate_json(&json!({"cart": {"__proto__": {"admin": true}}}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenKey { ref key, .. } if key == "__proto__"));

        let err = service().validate_json(&json!([{"constructor": 1}])).unwrap_err();
        assert!(matches!(err, ValidationError::ForbiddenKey { .. }));
    }

    #[test]
    fn test_structural_limits() {
        let svc = RequestValidationService::new(ValidationLimits {
            max_depth: 3,
            max_string_length: 5,
            max_array_length: 2,
            max_object_keys: 2,
            ..Default::default()
        });
        assert!(svc.validate_json(&json!({"a": {"b": {"c": 1}}})).is_ok());
        assert!(matches!(
            svc.validate_json(&json!({"a": {"b": {"c": {"d": 1}}}})),
            Err(ValidationError::TooDeep { limit: 3 })
        ));
        assert!(matches!(
            svc.validate_json(&json!({"s": "toolong"})),
            Err(ValidationError::StringTooLong { len: 7, .. })
        ));
        assert!(matches!(
            svc.validate_json(&json!([1, 2, 3])),
            Err(ValidationError::ArrayTooLong { len: 3, .. })
        ));
        assert!(matches!(
            svc.validate_json(&json!({"a": 1, "b": 2, "c": 3})),
            Err(ValidationError::TooManyKeys { count: 3, .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            service().validate_body(b"{\"a\":"),
            Err(ValidationError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_field_validators() {
        assert!(validate_email("email", "shopper@example.com").is_ok());
        assert!(validate_email("email", "shopper@localhost").is_err());
        assert!(validate_email("email", "two@@example.com").is_err());
        assert!(validate_email("email", "sp ace@example.com").is_err());

        assert!(validate_uuid("id", "67e55044-10b1-426f-9247-bb680e5fe0c8").is_ok());
        assert!(validate_uuid("id", "order-1").is_err());

        assert!(validate_amount("amount", 1999).is_ok());
        assert!(validate_amount("amount", 0).is_err());
        assert!(validate_amount("amount", MAX_AMOUNT_MINOR + 1).is_err());

        assert!(validate_currency("currency", "EUR").is_ok());
        assert!(validate_currency("currency", "eur").is_err());

        assert!(validate_country("country", "DE").is_ok());
        assert!(validate_country("country", "USA").is_err());
        assert!(validate_country("country", "us").is_err());

        assert!(validate_region("region", "CA").is_ok());
        assert!(validate_region("region", "Baden-Württemberg").is_ok());
        assert!(validate_region("region", "St. Gallen").is_ok());
        assert!(validate_region("region", " ").is_err());
        assert!(validate_region("region", "CA:evil").is_err());
        assert!(validate_region("region", &"x".repeat(MAX_REGION_LEN + 1)).is_err());

        let body = json!({"orderId": "o-1", "total": null});
        assert!(require_fields(&body, &["orderId"]).is_ok());
        assert_eq!(
            require_fields(&body, &["orderId", "total"]),
            Err(ValidationError::MissingField("total".into()))
        );
    }

    #[test]
    fn test_sanitize_string() {
        assert_eq!(service().sanitize_string("  hi\u{0000}\tthere\u{0007} "), "hi\tthere");
    }
}
