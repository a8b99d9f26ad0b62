//! Alert delivery for circuit breaker transitions.
//!
//! The sink is chosen once from configuration; breakers call [`AlertSink::notify`]
//! from their state-change hook and never know which delivery is active.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::AlertConfig;
use crate::resilience::circuit_breaker::{CircuitState, StateChangeHook};

/// Payload describing one breaker transition.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitAlert {
    pub circuit: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at_ms: u64,
}

/// Where transition alerts are delivered.
#[derive(Debug, Clone)]
pub enum AlertSink {
    /// Drop alerts silently.
    Disabled,
    /// Emit alerts as log events only.
    Log,
    /// POST alerts as JSON to an HTTP endpoint (logged as well).
    Webhook { url: String, client: reqwest::Client },
}

impl AlertSink {
    /// Resolve the configured sink.
    pub fn from_config(config: &AlertConfig) -> Self {
        match config {
            AlertConfig::Disabled => AlertSink::Disabled,
            AlertConfig::Log => AlertSink::Log,
            AlertConfig::Webhook { url, timeout_ms } => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_millis(*timeout_ms))
                    .build()
                    .unwrap_or_default();
                AlertSink::Webhook {
                    url: url.clone(),
                    client,
                }
            }
        }
    }

    pub fn notify(&self, alert: CircuitAlert) {
        match self {
            AlertSink::Disabled => {}
            AlertSink::Log => log_alert(&alert),
            AlertSink::Webhook { url, client } => {
                log_alert(&alert);
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(circuit = %alert.circuit, "No runtime available, alert webhook skipped");
                    return;
                };
                let url = url.clone();
                let client = client.clone();
                handle.spawn(async move {
                    if let Err(e) = client.post(&url).json(&alert).send().await {
                        tracing::warn!(url = %url, error = %e, "Failed to deliver circuit alert");
                    }
                });
            }
        }
    }

    /// Adapt the sink into a breaker state-change hook.
    pub fn into_hook(self, clock: crate::clock::SharedClock) -> StateChangeHook {
        Arc::new(move |name: &str, from: CircuitState, to: CircuitState| {
            self.notify(CircuitAlert {
                circuit: name.to_string(),
                from,
                to,
                at_ms: clock.now_ms(),
            });
        })
    }
}

fn log_alert(alert: &CircuitAlert) {
    match alert.to {
        CircuitState::Open => tracing::warn!(
            circuit = %alert.circuit,
            from = %alert.from,
            "ALERT: circuit opened, dependency calls are short-circuited"
        ),
        _ => tracing::info!(
            circuit = %alert.circuit,
            from = %alert.from,
            to = %alert.to,
            "Circuit state changed"
        ),
    }
}
