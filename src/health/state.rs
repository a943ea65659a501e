//! Endpoint health state machine.
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= failure_threshold
//! Unhealthy → Healthy: consecutive successes >= success_threshold
//! ```
//!
//! Counters reset on every transition. The counting itself lives on
//! [`Endpoint`](crate::load_balancer::endpoint::Endpoint) as atomics; this
//! module only names the thresholds and the transitions they produce.

use serde::Serialize;

use crate::config::HealthCheckConfig;

/// Consecutive-outcome thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub failure: u32,
    pub success: u32,
}

impl HealthThresholds {
    pub fn new(failure: u32, success: u32) -> Self {
        Self {
            failure: failure.max(1),
            success: success.max(1),
        }
    }
}

impl From<&HealthCheckConfig> for HealthThresholds {
    fn from(config: &HealthCheckConfig) -> Self {
        Self::new(config.failure_threshold, config.success_threshold)
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::from(&HealthCheckConfig::default())
    }
}

/// A flip of the health flag caused by one recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
}

impl HealthTransition {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthTransition::BecameHealthy)
    }
}
