//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define dispatcher metrics and export them through the `metrics` facade
//! - Expose a Prometheus-compatible endpoint
//! - Aggregate dispatch counters into a stats snapshot
//!
//! # Metrics
//! - `dispatch_selections_total` (counter): selections by algorithm, endpoint
//! - `dispatch_no_healthy_total` (counter): selections that found no endpoint
//! - `dispatch_requests_total` (counter): recorded outcomes by endpoint, result
//! - `dispatch_request_duration_seconds` (histogram): recorded latencies
//! - `endpoint_active_requests` (gauge): in-flight requests
//! - `endpoint_health` (gauge): 1=healthy, 0=unhealthy
//! - `health_probes_total` (counter): probes by endpoint, outcome
//! - `circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `circuit_rejections_total` (counter): calls rejected by an open circuit
//! - `sticky_lookups_total` (counter): sticky lookups by outcome

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::Algorithm;
use crate::load_balancer::endpoint::EndpointStats;
use crate::load_balancer::registry::Snapshot;
use crate::resilience::{CircuitState, CircuitStats};

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_selection(algorithm: Algorithm, endpoint: &str) {
    counter!(
        "dispatch_selections_total",
        "algorithm" => algorithm.as_str(),
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

pub fn record_no_healthy() {
    counter!("dispatch_no_healthy_total").increment(1);
}

pub fn record_request(endpoint: &str, latency: Duration, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(
        "dispatch_requests_total",
        "endpoint" => endpoint.to_string(),
        "result" => result
    )
    .increment(1);
    histogram!("dispatch_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_active_requests(endpoint: &str, active: usize) {
    gauge!("endpoint_active_requests", "endpoint" => endpoint.to_string()).set(active as f64);
}

pub fn record_endpoint_health(endpoint: &str, healthy: bool) {
    gauge!("endpoint_health", "endpoint" => endpoint.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_probe(endpoint: &str, outcome: &'static str) {
    counter!(
        "health_probes_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_circuit_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("circuit_state", "circuit" => name.to_string()).set(value);
}

pub fn record_circuit_rejection(name: &str) {
    counter!("circuit_rejections_total", "circuit" => name.to_string()).increment(1);
}

pub fn record_sticky_lookup(outcome: &'static str) {
    counter!("sticky_lookups_total", "outcome" => outcome).increment(1);
}

/// Dispatcher-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub selections: u64,
    pub no_healthy: u64,
    pub degraded_dispatches: u64,
    pub circuit_rejections: u64,
    pub sticky_hits: u64,
    pub sticky_misses: u64,
}

/// Full stats snapshot returned by `Dispatcher::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub algorithm: Algorithm,
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
    pub degraded: bool,
    pub endpoints: Vec<EndpointStats>,
    pub circuits: Vec<CircuitStats>,
    pub sticky_sessions: usize,
    pub counters: DispatchCounters,
}

/// Counts dispatch events and forwards them to the metrics facade.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    selections: AtomicU64,
    no_healthy: AtomicU64,
    degraded_dispatches: AtomicU64,
    circuit_rejections: AtomicU64,
    sticky_hits: AtomicU64,
    sticky_misses: AtomicU64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_selection(&self, algorithm: Algorithm, endpoint: &str) {
        self.selections.fetch_add(1, Ordering::Relaxed);
        record_selection(algorithm, endpoint);
    }

    pub fn on_no_healthy(&self) {
        self.no_healthy.fetch_add(1, Ordering::Relaxed);
        record_no_healthy();
    }

    pub fn on_degraded_dispatch(&self) {
        self.degraded_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_sticky(&self, hit: bool) {
        if hit {
            self.sticky_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sticky_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            selections: self.selections.load(Ordering::Relaxed),
            no_healthy: self.no_healthy.load(Ordering::Relaxed),
            degraded_dispatches: self.degraded_dispatches.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            sticky_hits: self.sticky_hits.load(Ordering::Relaxed),
            sticky_misses: self.sticky_misses.load(Ordering::Relaxed),
        }
    }

    /// Assemble a stats snapshot from the registry view and breaker states.
    pub fn stats(
        &self,
        algorithm: Algorithm,
        snapshot: &Snapshot,
        circuits: Vec<CircuitStats>,
        sticky_sessions: usize,
    ) -> DispatchStats {
        DispatchStats {
            algorithm,
            total_endpoints: snapshot.endpoints.len(),
            healthy_endpoints: snapshot.healthy.len(),
            degraded: snapshot.degraded,
            endpoints: snapshot.endpoints.iter().map(|ep| ep.stats()).collect(),
            circuits,
            sticky_sessions,
            counters: self.counters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let agg = MetricsAggregator::new();
        agg.on_selection(Algorithm::RoundRobin, "a");
        agg.on_selection(Algorithm::RoundRobin, "b");
        agg.on_no_healthy();
        agg.on_sticky(true);
        agg.on_sticky(false);
        agg.on_sticky(false);

        assert_eq!(
            agg.counters(),
            DispatchCounters {
                selections: 2,
                no_healthy: 1,
                degraded_dispatches: 0,
                circuit_rejections: 0,
                sticky_hits: 1,
                sticky_misses: 2,
            }
        );
    }
}
