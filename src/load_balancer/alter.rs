//! ALTER: adaptive scoring over latency, load and error rate.
//!
//! ```text
//! score = weight
//!       × 1 / (avg_latency_ms + epsilon_ms)
//!       × (1 − error_rate)
//!       × 1 / (1 + load_weight × active_requests)
//!       × jitter            jitter ∈ [1 − j, 1 + j]
//! ```
//!
//! The jitter keeps concurrent dispatchers that see the same statistics from
//! herding onto one endpoint. Endpoints without latency samples score high,
//! so new or recovered endpoints get traffic quickly.

use rand::Rng;
use std::sync::Arc;

use crate::config::{AlterConfig, Algorithm};
use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

#[derive(Debug, Clone)]
pub struct Alter {
    config: AlterConfig,
}

impl Alter {
    pub fn new(config: AlterConfig) -> Self {
        Self { config }
    }

    /// Score without jitter.
    pub fn base_score(&self, endpoint: &Endpoint) -> f64 {
        let latency = endpoint.avg_latency_ms() + self.config.epsilon_ms;
        let reliability = (1.0 - endpoint.error_rate()).clamp(0.0, 1.0);
        let load = 1.0 + self.config.load_weight * endpoint.active_requests() as f64;

        endpoint.weight as f64 / latency * reliability / load
    }

    fn jitter(&self) -> f64 {
        let j = self.config.jitter;
        if j <= 0.0 {
            1.0
        } else {
            rand::thread_rng().gen_range((1.0 - j)..=(1.0 + j))
        }
    }
}

impl LoadBalancer for Alter {
    fn next_endpoint(&self, candidates: &[Arc<Endpoint>], _client_key: Option<&str>) -> Option<Arc<Endpoint>> {
        let mut best: Option<(&Arc<Endpoint>, f64)> = None;
        for ep in candidates {
            let score = self.base_score(ep) * self.jitter();
            tracing::trace!(endpoint = %ep.id, score, "ALTER score");
            // Strict comparison keeps the earliest endpoint on ties.
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((ep, score));
            }
        }
        best.map(|(ep, _)| ep.clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Alter
    }
}
