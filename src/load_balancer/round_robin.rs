//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Algorithm;
use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

/// Round-robin selector.
///
/// The cursor walks the healthy list only, so an unhealthy endpoint never
/// hands its turn to the neighbour that follows it.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_endpoint(&self, candidates: &[Arc<Endpoint>], _client_key: Option<&str>) -> Option<Arc<Endpoint>> {
        if candidates.is_empty() {
            return None;
        }

        let turn = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(candidates[turn % candidates.len()].clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoints;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let eps = endpoints(&[1, 1]);

        let s1 = lb.next_endpoint(&eps, None).unwrap();
        assert_eq!(s1.id, eps[0].id);

        let s2 = lb.next_endpoint(&eps, None).unwrap();
        assert_eq!(s2.id, eps[1].id);

        let s3 = lb.next_endpoint(&eps, None).unwrap();
        assert_eq!(s3.id, eps[0].id);
    }

    #[test]
    fn test_cursor_spans_shrinking_list() {
        let lb = RoundRobin::new();
        let eps = endpoints(&[1, 1, 1]);

        assert_eq!(lb.next_endpoint(&eps, None).unwrap().id, "ep0");
        // ep1 dropped out of the healthy list; each survivor still gets one turn in two.
        let healthy = vec![eps[0].clone(), eps[2].clone()];
        let picks: Vec<_> = (0..4)
            .map(|_| lb.next_endpoint(&healthy, None).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["ep2", "ep0", "ep2", "ep0"]);
    }
}
