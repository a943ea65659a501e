//! Uniform random selection.

use std::sync::Arc;

use crate::config::Algorithm;
use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Random {
    fn next_endpoint(&self, candidates: &[Arc<Endpoint>], _client_key: Option<&str>) -> Option<Arc<Endpoint>> {
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[fastrand::usize(..candidates.len())].clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Random
    }
}
