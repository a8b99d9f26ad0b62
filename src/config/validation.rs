//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, windows and timeouts > 0)
//! - Check addresses parse and the admin key is not the placeholder
//! - Delegate component checks to the subsystems that own the types
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including on hot reload

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AlertConfig, GuardConfig, PLACEHOLDER_API_KEY};
use crate::resilience::ConfigError;
use crate::security::validation::validate_currency;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "must be set when the admin API is enabled"));
        }
    }

    let breakers = &config.circuit_breaker;
    collect(&mut errors, "circuit_breaker", breakers.defaults().validate());
    for name in breakers.overrides.keys() {
        collect(
            &mut errors,
            &format!("circuit_breaker.overrides.{name}"),
            breakers.for_dependency(name).validate(),
        );
    }

    let retries = &config.retries;
    for (name, retry) in [
        ("payment", &retries.payment),
        ("inventory", &retries.inventory),
        ("shipping", &retries.shipping),
        ("tax", &retries.tax),
    ] {
        collect(&mut errors, &format!("retries.{name}"), retry.validate());
    }

    for (preset, rule) in config.rate_limits.iter() {
        if rule.window_ms == 0 || rule.max_requests == 0 {
            errors.push(ValidationError::new(
                format!("rate_limits.{}", preset.as_str()),
                "window_ms and max_requests must be > 0",
            ));
        }
    }

    collect(&mut errors, "brute_force", config.brute_force.validate());
    collect(&mut errors, "replay", config.replay.validate());
    collect(&mut errors, "webhooks", config.webhooks.validate());

    let limits = &config.validation;
    if limits.max_body_bytes == 0
        || limits.max_depth == 0
        || limits.max_string_length == 0
        || limits.max_array_length == 0
        || limits.max_object_keys == 0
    {
        errors.push(ValidationError::new("validation", "all limits must be > 0"));
    }

    let checkout = &config.checkout;
    if checkout.call_timeout_ms == 0 || checkout.payment_timeout_ms == 0 {
        errors.push(ValidationError::new("checkout", "timeouts must be > 0"));
    }
    if checkout.flat_shipping_minor < 0 {
        errors.push(ValidationError::new("checkout.flat_shipping_minor", "must not be negative"));
    }
    if checkout.max_destination_caches == 0 {
        errors.push(ValidationError::new("checkout.max_destination_caches", "must be >= 1"));
    }
    if !(0.0..=1.0).contains(&checkout.default_tax_rate) {
        errors.push(ValidationError::new("checkout.default_tax_rate", "must be within 0.0..=1.0"));
    }
    if let Err(e) = validate_currency("checkout.shipping_currency", &checkout.shipping_currency) {
        errors.push(ValidationError::new("checkout.shipping_currency", e.to_string()));
    }

    if let AlertConfig::Webhook { url, timeout_ms } = &config.alerts {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError::new("alerts.url", "must be an http(s) URL"));
        }
        if *timeout_ms == 0 {
            errors.push(ValidationError::new("alerts.timeout_ms", "must be > 0"));
        }
    }

    if config.maintenance.sweep_interval_secs == 0 || config.maintenance.webhook_retry_interval_secs == 0 {
        errors.push(ValidationError::new("maintenance", "intervals must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{value}' is not a socket address")));
    }
}

fn collect(errors: &mut Vec<ValidationError>, field: &str, result: Result<(), ConfigError>) {
    if let Err(e) = result {
        errors.push(ValidationError::new(field, e.to_string()));
    }
}
