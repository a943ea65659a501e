//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every endpoint, concurrently and with a bounded fan-out
//! - Bound each probe by the configured timeout (expired probes are dropped)
//! - Feed outcomes into the endpoint health state machine

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::probe::{build_probe, Probe, ProbeError};
use crate::health::state::HealthThresholds;
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::registry::{log_transition, EndpointRegistry};
use crate::observability::metrics;

/// Outcome counts for one probe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub failed: usize,
    pub transitions: usize,
}

pub struct HealthMonitor {
    registry: Arc<EndpointRegistry>,
    config: HealthCheckConfig,
    thresholds: HealthThresholds,
    probe: Arc<dyn Probe>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<EndpointRegistry>, config: HealthCheckConfig) -> Self {
        let probe = build_probe(&config);
        Self::with_probe(registry, config, probe)
    }

    /// Monitor with a caller-supplied probe.
    pub fn with_probe(registry: Arc<EndpointRegistry>, config: HealthCheckConfig, probe: Arc<dyn Probe>) -> Self {
        Self {
            registry,
            thresholds: HealthThresholds::from(&config),
            config,
            probe,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            probe = ?self.probe,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every endpoint once.
    pub async fn check_all(&self) -> CycleReport {
        let endpoints = self.registry.all();
        let fan_out = self.config.max_concurrent_probes.max(1);

        let outcomes: Vec<(bool, bool)> = stream::iter(endpoints.iter().cloned())
            .map(|endpoint| async move { self.check_one(&endpoint).await })
            .buffer_unordered(fan_out)
            .collect()
            .await;

        let report = CycleReport {
            probed: outcomes.len(),
            failed: outcomes.iter().filter(|(ok, _)| !ok).count(),
            transitions: outcomes.iter().filter(|(_, flipped)| *flipped).count(),
        };
        tracing::debug!(
            probed = report.probed,
            failed = report.failed,
            transitions = report.transitions,
            "Health check cycle complete"
        );
        report
    }

    /// Returns (probe succeeded, health flipped).
    async fn check_one(&self, endpoint: &Endpoint) -> (bool, bool) {
        let timeout = self.config.timeout();
        let result = match time::timeout(timeout, self.probe.probe(endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        let transition = match &result {
            Ok(()) => {
                metrics::record_probe(&endpoint.id, "success");
                endpoint.mark_success(self.thresholds.success)
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %endpoint.id,
                    error = %e,
                    consecutive_failures = endpoint.consecutive_failures() + 1,
                    "Health probe failed"
                );
                metrics::record_probe(&endpoint.id, e.outcome());
                endpoint.mark_failure(self.thresholds.failure)
            }
        };

        if let Some(t) = transition {
            log_transition(endpoint, t, "probe");
        }
        (result.is_ok(), transition.is_some())
    }
}
