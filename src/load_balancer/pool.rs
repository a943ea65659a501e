//! Dispatcher: one logical load balancer.
//!
//! # Responsibilities
//! - Select an endpoint per request (sticky binding, then strategy)
//! - Apply the degraded policy when nothing is healthy
//! - Wrap dispatched calls in per-endpoint circuit breakers
//! - Request accounting through the registry, with an RAII guard

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::validation::validate_config;
use crate::config::{Algorithm, ConfigError, DegradedPolicy, DispatchConfig};
use crate::error::{CallError, DispatchError};
use crate::health::active::HealthMonitor;
use crate::health::state::HealthThresholds;
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::registry::{EndpointRegistry, Snapshot};
use crate::load_balancer::{build_strategy, LoadBalancer};
use crate::observability::metrics::{DispatchStats, MetricsAggregator};
use crate::resilience::{BreakerSettings, CircuitBreaker, CircuitError};
use crate::session::{SessionStore, StickySessionManager};

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<EndpointRegistry>,
    strategy: ArcSwap<Box<dyn LoadBalancer>>,
    config: ArcSwap<DispatchConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    sticky: Arc<StickySessionManager>,
    metrics: MetricsAggregator,
}

impl Dispatcher {
    /// Build a dispatcher, rejecting invalid configuration eagerly.
    pub fn new(config: DispatchConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let mut registry = EndpointRegistry::new(&config.endpoints, &config.stats)?;
        if config.health_check.passive {
            registry = registry.with_passive_health(HealthThresholds::from(&config.health_check));
        }

        tracing::info!(
            algorithm = config.algorithm.as_str(),
            endpoints = config.endpoints.len(),
            circuit_breaker = config.circuit_breaker.enabled,
            sticky_sessions = config.sticky_session.enabled,
            "Dispatcher created"
        );

        Ok(Self {
            registry: Arc::new(registry),
            strategy: ArcSwap::from_pointee(build_strategy(&config)),
            sticky: Arc::new(StickySessionManager::from_config(&config.sticky_session)),
            config: ArcSwap::from_pointee(config),
            breakers: DashMap::new(),
            metrics: MetricsAggregator::new(),
        })
    }

    /// Mirror sticky sessions into an external store. Call before sharing.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        let config = self.config.load_full();
        self.sticky = Arc::new(StickySessionManager::from_config(&config.sticky_session).with_store(store));
        self
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn config(&self) -> Arc<DispatchConfig> {
        self.config.load_full()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.strategy.load().algorithm()
    }

    /// Health monitor over this dispatcher's registry.
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.registry.clone(), self.config.load().health_check.clone())
    }

    /// Pick the endpoint for the next request.
    ///
    /// With sticky sessions enabled and a `client_key`, a valid binding wins;
    /// otherwise the strategy chooses among healthy endpoints.
    pub async fn next_endpoint(&self, client_key: Option<&str>) -> Result<Arc<Endpoint>, DispatchError> {
        let snapshot = self.registry.snapshot();
        let config = self.config.load_full();
        let strategy = self.strategy.load_full();

        if snapshot.healthy.is_empty() {
            return self.dispatch_degraded(&snapshot, config.degraded_policy, strategy.algorithm());
        }

        let total = snapshot.endpoints.len();
        let select = |candidates: &[Arc<Endpoint>]| {
            strategy
                .next_endpoint(candidates, client_key)
                .ok_or(DispatchError::NoHealthyEndpoints { total })
        };

        let endpoint = match client_key.filter(|_| config.sticky_session.enabled) {
            Some(client) => {
                let candidates = self.admitting(&snapshot.healthy);
                let mut missed = false;
                let endpoint = self
                    .sticky
                    .get_sticky_endpoint(client, &candidates, |candidates| {
                        missed = true;
                        select(candidates)
                    })
                    .await?;
                self.metrics.on_sticky(!missed);
                endpoint
            }
            None => select(&snapshot.healthy)?,
        };

        self.metrics.on_selection(strategy.algorithm(), &endpoint.id);
        tracing::trace!(endpoint = %endpoint.id, client = ?client_key, "Endpoint selected");
        Ok(endpoint)
    }

    /// Healthy endpoints whose breaker would admit a call now. Sticky
    /// bindings to a tripped endpoint are not honored; when every breaker
    /// is tripped the healthy set is returned unchanged.
    fn admitting(&self, healthy: &[Arc<Endpoint>]) -> Vec<Arc<Endpoint>> {
        if !self.config.load().circuit_breaker.enabled {
            return healthy.to_vec();
        }
        let admitting: Vec<_> = healthy
            .iter()
            .filter(|ep| self.breakers.get(&ep.id).map_or(true, |b| !b.is_rejecting()))
            .cloned()
            .collect();
        if admitting.is_empty() {
            healthy.to_vec()
        } else {
            admitting
        }
    }

    fn dispatch_degraded(
        &self,
        snapshot: &Snapshot,
        policy: DegradedPolicy,
        algorithm: Algorithm,
    ) -> Result<Arc<Endpoint>, DispatchError> {
        let total = snapshot.endpoints.len();
        if policy == DegradedPolicy::LeastBad {
            if let Some(endpoint) = snapshot.least_bad() {
                tracing::warn!(
                    endpoint = %endpoint.id,
                    total,
                    "No healthy endpoints, dispatching to least-bad endpoint"
                );
                self.metrics.on_degraded_dispatch();
                self.metrics.on_selection(algorithm, &endpoint.id);
                return Ok(endpoint);
            }
        }

        tracing::warn!(total, "No healthy endpoints available");
        self.metrics.on_no_healthy();
        Err(DispatchError::NoHealthyEndpoints { total })
    }

    pub fn record_request_start(&self, endpoint: &Endpoint) {
        self.registry.record_start(endpoint);
    }

    pub fn record_request_end(&self, endpoint: &Endpoint, latency: Duration, success: bool) {
        self.registry.record_end(endpoint, latency, success);
    }

    /// Start accounting a request to `endpoint`.
    pub fn begin(&self, endpoint: Arc<Endpoint>) -> RequestGuard {
        self.registry.record_start(&endpoint);
        RequestGuard {
            registry: self.registry.clone(),
            endpoint,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Select an endpoint and run `call` against it under its breaker.
    ///
    /// Selection errors and breaker rejections never invoke `call`. The
    /// dispatcher does not retry.
    pub async fn call<F, Fut, T, E>(&self, client_key: Option<&str>, call: F) -> Result<T, CallError<E>>
    where
        F: FnOnce(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let endpoint = self.next_endpoint(client_key).await?;
        let endpoint_id = endpoint.id.clone();

        let run = |endpoint: Arc<Endpoint>| async move {
            let guard = self.begin(endpoint.clone());
            let result = call(endpoint).await;
            guard.finish(result.is_ok());
            result
        };

        match self.breaker_for(&endpoint_id) {
            Some(breaker) => breaker.execute(|| run(endpoint)).await.map_err(|e| match e {
                CircuitError::Open { .. } => {
                    self.metrics.on_circuit_rejection();
                    CallError::CircuitOpen { endpoint: endpoint_id }
                }
                CircuitError::Inner(e) => CallError::Upstream(e),
            }),
            None => run(endpoint).await.map_err(CallError::Upstream),
        }
    }

    fn breaker_for(&self, endpoint_id: &str) -> Option<Arc<CircuitBreaker>> {
        let config = self.config.load();
        if !config.circuit_breaker.enabled {
            return None;
        }
        let breaker = self
            .breakers
            .entry(endpoint_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    endpoint_id,
                    BreakerSettings::from(&config.circuit_breaker),
                ))
            })
            .clone();
        Some(breaker)
    }

    /// Breaker for a known endpoint, created on first use.
    pub fn breaker(&self, endpoint_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.registry.get(endpoint_id)?;
        self.breaker_for(endpoint_id)
    }

    pub fn sticky(&self) -> &Arc<StickySessionManager> {
        &self.sticky
    }

    /// Evict expired sticky sessions now.
    pub async fn cleanup_sessions(&self) -> usize {
        self.sticky.cleanup().await
    }

    /// Manual health override. Marking an endpoint unhealthy drops its
    /// sticky bindings.
    pub async fn set_endpoint_health(&self, endpoint_id: &str, healthy: bool) -> Option<Arc<Endpoint>> {
        let endpoint = self.registry.set_healthy(endpoint_id, healthy)?;
        if !healthy {
            self.sticky.invalidate_endpoint(endpoint_id).await;
        }
        Some(endpoint)
    }

    pub fn stats(&self) -> DispatchStats {
        let mut circuits: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        circuits.sort_by(|a, b| a.name.cmp(&b.name));
        self.metrics.stats(
            self.algorithm(),
            &self.registry.snapshot(),
            circuits,
            self.sticky.len(),
        )
    }

    /// Apply a new configuration: membership, algorithm, degraded policy and
    /// breaker settings. Sticky TTL, passive health and the stats window keep
    /// their construction-time values.
    pub fn reconfigure(&self, config: &DispatchConfig) -> Result<(), ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;
        self.registry.reconfigure(&config.endpoints)?;

        let current = self.config.load_full();
        if current.algorithm != config.algorithm
            || current.ip_hash != config.ip_hash
            || current.alter != config.alter
        {
            tracing::info!(
                from = current.algorithm.as_str(),
                to = config.algorithm.as_str(),
                "Selection strategy replaced"
            );
            self.strategy.store(Arc::new(build_strategy(config)));
        }

        if current.circuit_breaker != config.circuit_breaker {
            tracing::info!("Circuit breaker settings changed, resetting breakers");
            self.breakers.clear();
        } else {
            self.breakers.retain(|id, _| self.registry.get(id).is_some());
        }

        self.config.store(Arc::new(config.clone()));
        Ok(())
    }
}

/// Accounting for one in-flight request.
///
/// `finish` records the outcome; dropping the guard unfinished records a
/// failure, so abandoned calls never leak `active_requests`.
#[derive(Debug)]
pub struct RequestGuard {
    registry: Arc<EndpointRegistry>,
    endpoint: Arc<Endpoint>,
    started: Instant,
    finished: bool,
}

impl RequestGuard {
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn finish(mut self, success: bool) {
        self.record(success);
    }

    fn record(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.registry
            .record_end(&self.endpoint, self.started.elapsed(), success);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(endpoint = %self.endpoint.id, "Request abandoned, recording failure");
        }
        self.record(false);
    }
}
