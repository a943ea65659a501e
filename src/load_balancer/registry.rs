//! Endpoint registry.
//!
//! # Responsibilities
//! - Own the endpoint list and hand out immutable snapshots for selection
//! - Request accounting (`record_start` / `record_end`)
//! - Administrative membership changes and manual health overrides
//!
//! Membership lives behind an `ArcSwap`, so a dispatch works on one consistent
//! list even while a reconfiguration swaps in the next one.

use arc_swap::ArcSwap;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, EndpointConfig, StatsConfig};
use crate::config::validation::{validate_endpoints, ValidationError};
use crate::health::state::{HealthThresholds, HealthTransition};
use crate::load_balancer::endpoint::Endpoint;
use crate::observability::metrics;

/// Immutable view of the registry for one selection decision.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Every endpoint, in configuration order.
    pub endpoints: Arc<Vec<Arc<Endpoint>>>,
    /// Healthy endpoints, in configuration order.
    pub healthy: Vec<Arc<Endpoint>>,
    /// True when endpoints exist but none is healthy.
    pub degraded: bool,
}

impl Snapshot {
    fn capture(endpoints: Arc<Vec<Arc<Endpoint>>>) -> Self {
        let healthy: Vec<_> = endpoints.iter().filter(|ep| ep.is_healthy()).cloned().collect();
        let degraded = healthy.is_empty() && !endpoints.is_empty();
        Self {
            endpoints,
            healthy,
            degraded,
        }
    }

    /// The unhealthy endpoint closest to recovery: fewest consecutive
    /// failures, then lowest error rate, then configuration order.
    pub fn least_bad(&self) -> Option<Arc<Endpoint>> {
        self.endpoints
            .iter()
            .min_by(|a, b| {
                a.consecutive_failures()
                    .cmp(&b.consecutive_failures())
                    .then_with(|| {
                        a.error_rate()
                            .partial_cmp(&b.error_rate())
                            .unwrap_or(Ordering::Equal)
                    })
            })
            .cloned()
    }
}

/// Holds the candidate endpoints and their runtime state.
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    stats_config: StatsConfig,
    passive: Option<HealthThresholds>,
}

impl EndpointRegistry {
    /// Build a registry, rejecting malformed endpoints eagerly.
    pub fn new(configs: &[EndpointConfig], stats: &StatsConfig) -> Result<Self, ConfigError> {
        let endpoints = Self::build(configs, stats, &[])?;
        Ok(Self {
            endpoints: ArcSwap::from_pointee(endpoints),
            stats_config: stats.clone(),
            passive: None,
        })
    }

    /// Let `record_end` outcomes drive health with these thresholds.
    pub fn with_passive_health(mut self, thresholds: HealthThresholds) -> Self {
        self.passive = Some(thresholds);
        self
    }

    fn build(
        configs: &[EndpointConfig],
        stats: &StatsConfig,
        current: &[Arc<Endpoint>],
    ) -> Result<Vec<Arc<Endpoint>>, ConfigError> {
        let errors = validate_endpoints(configs);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        let mut endpoints = Vec::with_capacity(configs.len());
        for config in configs {
            // Unchanged endpoints keep their counters and statistics.
            if let Some(existing) = current.iter().find(|ep| ep.matches(config)) {
                endpoints.push(existing.clone());
                continue;
            }
            // Urls were validated above.
            let endpoint = Endpoint::from_config(config, stats).map_err(|_| {
                ConfigError::Validation(vec![ValidationError::InvalidUrl {
                    id: config.id.clone(),
                    url: config.url.clone().unwrap_or_default(),
                }])
            })?;
            endpoints.push(Arc::new(endpoint));
        }
        Ok(endpoints)
    }

    /// Swap in a new membership. Administrative, never on the hot path.
    pub fn reconfigure(&self, configs: &[EndpointConfig]) -> Result<(), ConfigError> {
        let current = self.endpoints.load_full();
        let next = Self::build(configs, &self.stats_config, &current)?;

        let kept = next.iter().filter(|ep| current.iter().any(|c| Arc::ptr_eq(c, ep))).count();
        tracing::info!(
            total = next.len(),
            kept,
            replaced = next.len() - kept,
            removed = current.len() - kept,
            "Endpoint membership reconfigured"
        );
        self.endpoints.store(Arc::new(next));
        Ok(())
    }

    /// Consistent view for one selection.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self.endpoints.load_full())
    }

    /// All endpoints, for health checking and reporting.
    pub fn all(&self) -> Arc<Vec<Arc<Endpoint>>> {
        self.endpoints.load_full()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.load().iter().find(|ep| ep.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A request to `endpoint` has started.
    pub fn record_start(&self, endpoint: &Endpoint) {
        endpoint.inc_active();
        metrics::record_active_requests(&endpoint.id, endpoint.active_requests());
    }

    /// A request to `endpoint` has finished.
    pub fn record_end(&self, endpoint: &Endpoint, latency: Duration, success: bool) -> Option<HealthTransition> {
        endpoint.dec_active();
        endpoint.record_outcome(latency, success);
        metrics::record_active_requests(&endpoint.id, endpoint.active_requests());
        metrics::record_request(&endpoint.id, latency, success);

        let thresholds = self.passive?;
        let transition = if success {
            endpoint.mark_success(thresholds.success)
        } else {
            endpoint.mark_failure(thresholds.failure)
        };
        if let Some(t) = transition {
            log_transition(endpoint, t, "passive");
        }
        transition
    }

    /// Manual health override. Returns the endpoint when it exists.
    pub fn set_healthy(&self, id: &str, healthy: bool) -> Option<Arc<Endpoint>> {
        let endpoint = self.get(id)?;
        if let Some(t) = endpoint.set_healthy(healthy) {
            log_transition(&endpoint, t, "manual");
        }
        Some(endpoint)
    }
}

/// Log and export a health flip.
pub(crate) fn log_transition(endpoint: &Endpoint, transition: HealthTransition, source: &'static str) {
    match transition {
        HealthTransition::BecameHealthy => {
            tracing::info!(endpoint = %endpoint.id, source, "Endpoint marked healthy")
        }
        HealthTransition::BecameUnhealthy => {
            tracing::warn!(endpoint = %endpoint.id, source, "Endpoint marked unhealthy")
        }
    }
    metrics::record_endpoint_health(&endpoint.id, transition.is_healthy());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(weights: &[u32]) -> EndpointRegistry {
        let configs: Vec<_> = weights
            .iter()
            .enumerate()
            .map(|(i, w)| EndpointConfig::new(format!("ep{}", i), *w))
            .collect();
        EndpointRegistry::new(&configs, &StatsConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_endpoints() {
        let err = EndpointRegistry::new(&[EndpointConfig::new("a", 0)], &StatsConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_snapshot_filters_unhealthy() {
        let reg = registry(&[1, 1, 1]);
        reg.set_healthy("ep1", false);

        let snap = reg.snapshot();
        assert_eq!(snap.endpoints.len(), 3);
        let ids: Vec<_> = snap.healthy.iter().map(|ep| ep.id.as_str()).collect();
        assert_eq!(ids, vec!["ep0", "ep2"]);
        assert!(!snap.degraded);
    }

    #[test]
    fn test_degraded_when_all_unhealthy() {
        let reg = registry(&[1, 1]);
        reg.set_healthy("ep0", false);
        reg.set_healthy("ep1", false);

        let snap = reg.snapshot();
        assert!(snap.degraded);
        assert!(snap.healthy.is_empty());
        assert_eq!(snap.endpoints.len(), 2);
    }

    #[test]
    fn test_least_bad_prefers_fewest_failures() {
        let reg = registry(&[1, 1, 1]);
        let all = reg.all();
        all[0].mark_failure(10);
        all[0].mark_failure(10);
        all[1].mark_failure(10);
        all[2].mark_failure(10);
        all[2].record_outcome(Duration::from_millis(1), false);

        assert_eq!(reg.snapshot().least_bad().unwrap().id, "ep1");
    }

    #[test]
    fn test_record_start_end_balance() {
        let reg = registry(&[1]);
        let ep = reg.get("ep0").unwrap();

        reg.record_start(&ep);
        reg.record_start(&ep);
        assert_eq!(ep.active_requests(), 2);

        reg.record_end(&ep, Duration::from_millis(5), true);
        reg.record_end(&ep, Duration::from_millis(7), false);
        reg.record_end(&ep, Duration::from_millis(7), false);
        assert_eq!(ep.active_requests(), 0);
        assert_eq!(ep.stats().total_requests, 3);
    }

    #[test]
    fn test_passive_health() {
        let reg = registry(&[1]).with_passive_health(HealthThresholds::new(2, 1));
        let ep = reg.get("ep0").unwrap();

        assert_eq!(reg.record_end(&ep, Duration::ZERO, false), None);
        assert_eq!(
            reg.record_end(&ep, Duration::ZERO, false),
            Some(HealthTransition::BecameUnhealthy)
        );
        assert_eq!(
            reg.record_end(&ep, Duration::ZERO, true),
            Some(HealthTransition::BecameHealthy)
        );
    }

    #[test]
    fn test_reconfigure_preserves_unchanged_state() {
        let reg = registry(&[1, 1]);
        let ep0 = reg.get("ep0").unwrap();
        reg.record_start(&ep0);

        reg.reconfigure(&[
            EndpointConfig::new("ep0", 1),
            EndpointConfig::new("ep1", 5),
            EndpointConfig::new("ep2", 1),
        ])
        .unwrap();

        assert!(Arc::ptr_eq(&reg.get("ep0").unwrap(), &ep0));
        assert_eq!(reg.get("ep0").unwrap().active_requests(), 1);
        assert_eq!(reg.get("ep1").unwrap().weight, 5);
        assert_eq!(reg.len(), 3);

        // A held snapshot keeps the old membership.
        let snap = reg.snapshot();
        reg.reconfigure(&[EndpointConfig::new("ep0", 1)]).unwrap();
        assert_eq!(snap.endpoints.len(), 3);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_reconfigure_rejects_invalid() {
        let reg = registry(&[1]);
        assert!(reg.reconfigure(&[EndpointConfig::new("x", 0)]).is_err());
        assert_eq!(reg.len(), 1);
    }
}
