//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), from --config or CHECKOUT_GUARD_CONFIG
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → lifecycle/startup.rs builds every service from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rate-limit rules swapped atomically (arc-swap)
//! ```
//!
//! # Design Decisions
//! - Only rate-limit rules reload live; everything else needs a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, resolve_config_path, LoadError, CONFIG_ENV_VAR};
pub use schema::{
    AdminConfig, AlertConfig, CircuitBreakerSection, GuardConfig, ListenerConfig, LogFormat, MaintenanceConfig,
    ObservabilityConfig, RetriesConfig,
};
