//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::config::Algorithm;
use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

/// Least connections selector.
/// Selects the endpoint with the minimum number of in-flight requests.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_endpoint(&self, candidates: &[Arc<Endpoint>], _client_key: Option<&str>) -> Option<Arc<Endpoint>> {
        // In case of tie, the first one is selected (stability)
        candidates
            .iter()
            .min_by_key(|ep| ep.active_requests())
            .cloned()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeastConnections
    }
}
