//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single backend destination
//! - Track in-flight requests (for Least Connections and ALTER)
//! - Track health state and consecutive probe outcomes
//! - Keep rolling latency and error-rate statistics

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use url::Url;

use crate::config::{EndpointConfig, StatsConfig};
use crate::health::state::HealthTransition;

/// Bounded latency window plus an EWMA error rate.
#[derive(Debug)]
struct RollingStats {
    latencies_ms: VecDeque<f64>,
    latency_sum_ms: f64,
    window: usize,
    error_rate: f64,
    alpha: f64,
    total_requests: u64,
    total_failures: u64,
}

impl RollingStats {
    fn new(config: &StatsConfig) -> Self {
        let window = config.latency_window.max(1);
        Self {
            latencies_ms: VecDeque::with_capacity(window),
            latency_sum_ms: 0.0,
            window,
            error_rate: 0.0,
            alpha: config.error_rate_alpha.clamp(f64::MIN_POSITIVE, 1.0),
            total_requests: 0,
            total_failures: 0,
        }
    }

    fn record(&mut self, latency: Duration, success: bool) {
        let ms = latency.as_micros() as f64 / 1000.0;
        if self.latencies_ms.len() == self.window {
            if let Some(oldest) = self.latencies_ms.pop_front() {
                self.latency_sum_ms -= oldest;
            }
        }
        self.latencies_ms.push_back(ms);
        self.latency_sum_ms += ms;

        let sample = if success { 0.0 } else { 1.0 };
        self.error_rate += self.alpha * (sample - self.error_rate);

        self.total_requests += 1;
        if !success {
            self.total_failures += 1;
        }
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            0.0
        } else {
            (self.latency_sum_ms / self.latencies_ms.len() as f64).max(0.0)
        }
    }
}

/// A single backend endpoint.
#[derive(Debug)]
pub struct Endpoint {
    /// Unique identifier.
    pub id: String,
    /// Base URL, used by probes.
    pub url: Option<Url>,
    /// Selection weight, always > 0.
    pub weight: u32,

    healthy: AtomicBool,
    active_requests: AtomicUsize,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    stats: Mutex<RollingStats>,
}

impl Endpoint {
    /// Create an endpoint without an address. A zero weight is raised to 1.
    pub fn new(id: impl Into<String>, weight: u32) -> Self {
        Self::build(id.into(), None, weight, &StatsConfig::default())
    }

    /// Create an endpoint from validated configuration.
    pub fn from_config(config: &EndpointConfig, stats: &StatsConfig) -> Result<Self, url::ParseError> {
        let url = config.url.as_deref().map(Url::parse).transpose()?;
        Ok(Self::build(config.id.clone(), url, config.weight, stats))
    }

    fn build(id: String, url: Option<Url>, weight: u32, stats: &StatsConfig) -> Self {
        Self {
            id,
            url,
            weight: weight.max(1),
            healthy: AtomicBool::new(true),
            active_requests: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            stats: Mutex::new(RollingStats::new(stats)),
        }
    }

    /// Same identity, address and weight as `config`.
    pub fn matches(&self, config: &EndpointConfig) -> bool {
        let url = config.url.as_deref().and_then(|u| Url::parse(u).ok());
        self.id == config.id && self.weight == config.weight && self.url == url
    }

    // --- Request accounting ---

    /// Number of requests currently in flight.
    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_active(&self) {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturating decrement; an unmatched end never wraps below zero.
    pub(crate) fn dec_active(&self) {
        let _ = self
            .active_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn record_outcome(&self, latency: Duration, success: bool) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(latency, success);
    }

    /// Mean of the latency window in milliseconds (0 with no samples).
    pub fn avg_latency_ms(&self) -> f64 {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).avg_latency_ms()
    }

    /// Rolling error rate in `[0, 1]`.
    pub fn error_rate(&self) -> f64 {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).error_rate
    }

    // --- Health Logic ---

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    /// Force the health flag, resetting both counters.
    pub fn set_healthy(&self, healthy: bool) -> Option<HealthTransition> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.flip(!healthy, healthy)
    }

    /// Report a successful probe or request.
    pub fn mark_success(&self, success_threshold: u32) -> Option<HealthTransition> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.is_healthy() && successes >= success_threshold {
            let transition = self.flip(false, true);
            if transition.is_some() {
                self.consecutive_successes.store(0, Ordering::Relaxed);
            }
            return transition;
        }
        None
    }

    /// Report a failed probe or request.
    pub fn mark_failure(&self, failure_threshold: u32) -> Option<HealthTransition> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        if self.is_healthy() && failures >= failure_threshold {
            let transition = self.flip(true, false);
            if transition.is_some() {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            return transition;
        }
        None
    }

    /// Only the caller that wins the exchange reports the transition.
    fn flip(&self, from: bool, to: bool) -> Option<HealthTransition> {
        self.healthy
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                if to {
                    HealthTransition::BecameHealthy
                } else {
                    HealthTransition::BecameUnhealthy
                }
            })
    }

    /// Point-in-time view for stats reporting.
    pub fn stats(&self) -> EndpointStats {
        let (avg_latency_ms, error_rate, samples, total_requests, total_failures) = {
            let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            (
                stats.avg_latency_ms(),
                stats.error_rate,
                stats.latencies_ms.len(),
                stats.total_requests,
                stats.total_failures,
            )
        };
        EndpointStats {
            id: self.id.clone(),
            url: self.url.as_ref().map(ToString::to_string),
            weight: self.weight,
            healthy: self.is_healthy(),
            active_requests: self.active_requests(),
            consecutive_failures: self.consecutive_failures(),
            consecutive_successes: self.consecutive_successes(),
            avg_latency_ms,
            error_rate,
            latency_samples: samples,
            total_requests,
            total_failures,
        }
    }
}

/// Serializable per-endpoint statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub id: String,
    pub url: Option<String>,
    pub weight: u32,
    pub healthy: bool,
    pub active_requests: usize,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub latency_samples: usize,
    pub total_requests: u64,
    pub total_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requests_never_negative() {
        let ep = Endpoint::new("a", 1);
        ep.dec_active();
        assert_eq!(ep.active_requests(), 0);

        ep.inc_active();
        ep.inc_active();
        ep.dec_active();
        assert_eq!(ep.active_requests(), 1);
    }

    #[test]
    fn test_latency_window_evicts_oldest() {
        let stats = StatsConfig {
            latency_window: 3,
            error_rate_alpha: 0.5,
        };
        let ep = Endpoint::from_config(&EndpointConfig::new("a", 1), &stats).unwrap();

        for ms in [100, 10, 20, 30] {
            ep.record_outcome(Duration::from_millis(ms), true);
        }

        let snapshot = ep.stats();
        assert_eq!(snapshot.latency_samples, 3);
        assert!((snapshot.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.total_requests, 4);
    }

    #[test]
    fn test_error_rate_tracks_recent_outcomes() {
        let stats = StatsConfig {
            latency_window: 10,
            error_rate_alpha: 0.5,
        };
        let ep = Endpoint::from_config(&EndpointConfig::new("a", 1), &stats).unwrap();

        ep.record_outcome(Duration::from_millis(1), false);
        assert!((ep.error_rate() - 0.5).abs() < 1e-9);
        ep.record_outcome(Duration::from_millis(1), false);
        assert!((ep.error_rate() - 0.75).abs() < 1e-9);
        ep.record_outcome(Duration::from_millis(1), true);
        assert!((ep.error_rate() - 0.375).abs() < 1e-9);
        assert_eq!(ep.stats().total_failures, 2);
    }

    #[test]
    fn test_health_thresholds() {
        let ep = Endpoint::new("a", 1);

        assert_eq!(ep.mark_failure(3), None);
        assert_eq!(ep.mark_failure(3), None);
        assert_eq!(ep.mark_failure(3), Some(HealthTransition::BecameUnhealthy));
        assert!(!ep.is_healthy());
        assert_eq!(ep.consecutive_failures(), 0);

        // A success in between resets the streak.
        assert_eq!(ep.mark_success(2), None);
        assert_eq!(ep.mark_failure(3), None);
        assert_eq!(ep.mark_success(2), None);
        assert_eq!(ep.mark_success(2), Some(HealthTransition::BecameHealthy));
        assert!(ep.is_healthy());
        assert_eq!(ep.consecutive_successes(), 0);
    }

    #[test]
    fn test_set_healthy_reports_only_real_flips() {
        let ep = Endpoint::new("a", 1);
        assert_eq!(ep.set_healthy(true), None);
        assert_eq!(ep.set_healthy(false), Some(HealthTransition::BecameUnhealthy));
        assert_eq!(ep.set_healthy(false), None);
    }

    #[test]
    fn test_matches_config() {
        let config = EndpointConfig::new("a", 2).with_url("http://127.0.0.1:9000");
        let ep = Endpoint::from_config(&config, &StatsConfig::default()).unwrap();
        assert!(ep.matches(&config));
        assert!(!ep.matches(&EndpointConfig::new("a", 2)));
        assert!(!ep.matches(&EndpointConfig::new("a", 3).with_url("http://127.0.0.1:9000")));
    }
}
