//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! Every section has defaults, so an empty file is a valid configuration.
//! Component configs (`RetryConfig`, `RateLimitRules`, `BruteForceConfig`, ...)
//! are owned by their subsystems and embedded here as-is.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::checkout::CheckoutSettings;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::security::{BruteForceConfig, RateLimitRules, ReplayConfig, ValidationLimits};
use crate::webhooks::WebhookConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// HTTP listener for webhook ingress and health.
    pub listener: ListenerConfig,

    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Breaker defaults plus per-dependency overrides.
    pub circuit_breaker: CircuitBreakerSection,

    /// Retry budgets per dependency.
    pub retries: RetriesConfig,

    /// One fixed-window rule per preset. Hot-reloadable.
    pub rate_limits: RateLimitRules,

    pub brute_force: BruteForceConfig,

    pub replay: ReplayConfig,

    pub webhooks: WebhookConfig,

    /// Request payload limits.
    pub validation: ValidationLimits,

    pub checkout: CheckoutSettings,

    /// Where circuit transition alerts go.
    pub alerts: AlertConfig,

    pub maintenance: MaintenanceConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Breaker thresholds as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Cooldown before a recovery probe, in milliseconds.
    pub timeout_ms: u64,

    /// Per-dependency overrides keyed by breaker name (e.g. `payment_gateway`).
    pub overrides: BTreeMap<String, BreakerOverride>,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct BreakerOverride {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub timeout_ms: Option<u64>,
}

impl CircuitBreakerSection {
    pub fn defaults(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.failure_threshold,
            self.success_threshold,
            Duration::from_millis(self.timeout_ms),
        )
    }

    /// Defaults with the named override applied.
    pub fn for_dependency(&self, name: &str) -> CircuitBreakerConfig {
        let Some(o) = self.overrides.get(name) else {
            return self.defaults();
        };
        CircuitBreakerConfig::new(
            o.failure_threshold.unwrap_or(self.failure_threshold),
            o.success_threshold.unwrap_or(self.success_threshold),
            Duration::from_millis(o.timeout_ms.unwrap_or(self.timeout_ms)),
        )
    }
}

/// Retry budgets, defaulting to the named presets.
///
/// Webhook redelivery is scheduled by the ledger's own tiers, not here.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetriesConfig {
    pub payment: RetryConfig,
    pub inventory: RetryConfig,
    pub shipping: RetryConfig,
    pub tax: RetryConfig,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            payment: RetryConfig::PAYMENT,
            inventory: RetryConfig::INVENTORY,
            shipping: RetryConfig::SHIPPING,
            tax: RetryConfig::TAX,
        }
    }
}

/// Alert delivery for circuit transitions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertConfig {
    Disabled,
    #[default]
    Log,
    Webhook {
        url: String,
        #[serde(default = "default_alert_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_alert_timeout_ms() -> u64 {
    5_000
}

/// Background sweep intervals.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Expired rate-limit windows, login counters, nonces, ledger entries.
    pub sweep_interval_secs: u64,

    /// How often due webhook retries are run.
    pub webhook_retry_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            webhook_retry_interval_secs: 30,
        }
    }
}
