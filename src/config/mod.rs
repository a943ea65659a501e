//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DispatchConfig (validated, immutable)
//!     → Dispatcher::new
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Dispatcher::reconfigure (endpoint membership swapped atomically)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Malformed weights and thresholds fail at construction, never at dispatch

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{
    AdminConfig, AlterConfig, Algorithm, CircuitBreakerConfig, DegradedPolicy, DispatchConfig,
    EndpointConfig, HashMode, HealthCheckConfig, IpHashConfig, ObservabilityConfig, ProbeKind,
    StatsConfig, StickySessionConfig,
};
