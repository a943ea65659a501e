//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for one logical load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    /// Selection algorithm.
    pub algorithm: Algorithm,

    /// Behaviour when every endpoint is unhealthy.
    pub degraded_policy: DegradedPolicy,

    /// Ordered endpoint list. Order is the tie-break order for selection.
    pub endpoints: Vec<EndpointConfig>,

    /// Probe-based health checking.
    pub health_check: HealthCheckConfig,

    /// Per-endpoint circuit breakers.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Client affinity.
    pub sticky_session: StickySessionConfig,

    /// IP-hash strategy settings.
    pub ip_hash: IpHashConfig,

    /// ALTER scoring coefficients.
    pub alter: AlterConfig,

    /// Rolling statistics kept per endpoint.
    pub stats: StatsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Closed set of selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
    IpHash,
    Alter,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round-robin",
            Algorithm::WeightedRoundRobin => "weighted-round-robin",
            Algorithm::LeastConnections => "least-connections",
            Algorithm::Random => "random",
            Algorithm::IpHash => "ip-hash",
            Algorithm::Alter => "alter",
        }
    }
}

/// What to do when the healthy set is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DegradedPolicy {
    /// Surface `NoHealthyEndpoints` to the caller.
    #[default]
    Reject,
    /// Dispatch to the least-bad unhealthy endpoint.
    LeastBad,
}

/// Endpoint definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Unique endpoint identifier.
    pub id: String,

    /// Endpoint base URL (e.g., "http://127.0.0.1:3000"). Required for probing.
    #[serde(default)]
    pub url: Option<String>,

    /// Weight for weighted strategies (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl EndpointConfig {
    pub fn new(id: impl Into<String>, weight: u32) -> Self {
        Self {
            id: id.into(),
            url: None,
            weight,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

fn default_weight() -> u32 {
    1
}

/// Probe transport used by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    #[default]
    Http,
    Tcp,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe cycle interval in milliseconds.
    pub interval_ms: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Consecutive failures before marking unhealthy.
    pub failure_threshold: u32,

    /// Consecutive successes before marking healthy again.
    pub success_threshold: u32,

    /// Probe transport.
    pub probe: ProbeKind,

    /// Path appended to the endpoint URL for HTTP probes.
    pub path: String,

    /// Upper bound on probes in flight during one cycle.
    pub max_concurrent_probes: usize,

    /// Let recorded request outcomes drive health as well.
    pub passive: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            timeout_ms: 2_000,
            failure_threshold: 3,
            success_threshold: 2,
            probe: ProbeKind::Http,
            path: "/health".to_string(),
            max_concurrent_probes: 16,
            passive: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Wrap dispatched calls in per-endpoint breakers.
    pub enabled: bool,

    /// Consecutive failures (while closed) that open the circuit.
    pub failure_threshold: u32,

    /// Time an open circuit waits before admitting a trial call.
    pub recovery_timeout_ms: u64,

    /// Window used for failure-rate reporting.
    pub monitoring_period_ms: u64,

    /// Trial successes needed to close from half-open.
    pub success_threshold: u32,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            monitoring_period_ms: 60_000,
            success_threshold: 1,
            half_open_max_calls: 1,
        }
    }
}

/// Sticky session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StickySessionConfig {
    /// Consult sessions before the strategy when a client key is present.
    pub enabled: bool,

    /// Session lifetime in milliseconds.
    pub ttl_ms: u64,

    /// Extend the expiry on every hit.
    pub sliding: bool,

    /// Background sweep interval in milliseconds (0 disables the sweep).
    pub cleanup_interval_ms: u64,
}

impl StickySessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for StickySessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_ms: 30 * 60 * 1000,
            sliding: false,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Hashing mode for the ip-hash strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HashMode {
    /// `hash % healthy_count`. Remaps widely when the healthy set changes.
    #[default]
    Modulo,
    /// Hash ring with virtual nodes. Only keys of the changed endpoint move.
    Consistent,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IpHashConfig {
    pub mode: HashMode,
    pub virtual_nodes: u32,
}

impl Default for IpHashConfig {
    fn default() -> Self {
        Self {
            mode: HashMode::Modulo,
            virtual_nodes: 160,
        }
    }
}

/// ALTER scoring coefficients.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlterConfig {
    /// Added to the average latency so cold endpoints do not divide by zero.
    pub epsilon_ms: f64,

    /// Jitter half-width; the multiplier is drawn from `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,

    /// Penalty per in-flight request.
    pub load_weight: f64,
}

impl Default for AlterConfig {
    fn default() -> Self {
        Self {
            epsilon_ms: 1.0,
            jitter: 0.1,
            load_weight: 1.0,
        }
    }
}

/// Rolling statistics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Number of recent latencies kept per endpoint.
    pub latency_window: usize,

    /// Smoothing factor of the error-rate EWMA (0 < alpha <= 1).
    pub error_rate_alpha: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            latency_window: 100,
            error_rate_alpha: 0.1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format (full, compact, pretty).
    pub log_format: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "full".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
