//! Smooth weighted round-robin.
//!
//! Every pick adds each candidate's weight to its running counter, takes the
//! largest counter and subtracts the total weight from the winner. Over any
//! window of `Σweights` picks each endpoint is chosen exactly `weight` times,
//! and a heavy endpoint is spread out instead of served back to back.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Algorithm;
use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

#[derive(Debug, Default)]
struct WeightTable {
    /// Candidate ids the counters belong to, in candidate order.
    members: Vec<String>,
    current: Vec<i64>,
}

impl WeightTable {
    /// Counters restart whenever the candidate membership changes.
    fn sync(&mut self, candidates: &[Arc<Endpoint>]) {
        let unchanged = self.members.len() == candidates.len()
            && self.members.iter().zip(candidates).all(|(id, ep)| *id == ep.id);
        if !unchanged {
            self.members = candidates.iter().map(|ep| ep.id.clone()).collect();
            self.current = vec![0; candidates.len()];
        }
    }
}

/// Weighted round-robin selector.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    table: Mutex<WeightTable>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_endpoint(&self, candidates: &[Arc<Endpoint>], _client_key: Option<&str>) -> Option<Arc<Endpoint>> {
        if candidates.is_empty() {
            return None;
        }

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.sync(candidates);

        let total: i64 = candidates.iter().map(|ep| ep.weight as i64).sum();
        let mut best = 0;
        for (i, ep) in candidates.iter().enumerate() {
            table.current[i] += ep.weight as i64;
            // Strict comparison keeps the earliest endpoint on ties.
            if table.current[i] > table.current[best] {
                best = i;
            }
        }
        table.current[best] -= total;

        Some(candidates[best].clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::WeightedRoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoints;
    use std::collections::HashMap;

    fn picks(lb: &WeightedRoundRobin, eps: &[Arc<Endpoint>], n: usize) -> Vec<String> {
        (0..n)
            .map(|_| lb.next_endpoint(eps, None).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_smooth_sequence() {
        let lb = WeightedRoundRobin::new();
        let eps = endpoints(&[3, 2, 2]);

        assert_eq!(
            picks(&lb, &eps, 7),
            vec!["ep0", "ep1", "ep2", "ep0", "ep1", "ep2", "ep0"]
        );
    }

    #[test]
    fn test_every_window_matches_weights() {
        let lb = WeightedRoundRobin::new();
        let weights = [5, 1, 3, 1];
        let eps = endpoints(&weights);
        let total: u32 = weights.iter().sum();

        for _ in 0..4 {
            let mut counts: HashMap<String, u32> = HashMap::new();
            for id in picks(&lb, &eps, total as usize) {
                *counts.entry(id).or_default() += 1;
            }
            for (i, w) in weights.iter().enumerate() {
                assert_eq!(counts[&format!("ep{}", i)], *w);
            }
        }
    }

    #[test]
    fn test_heavy_endpoint_not_bursty() {
        let lb = WeightedRoundRobin::new();
        let eps = endpoints(&[2, 1, 1]);
        let seq = picks(&lb, &eps, 4);
        assert_ne!(seq[0], seq[1]);
    }

    #[test]
    fn test_membership_change_restarts_counters() {
        let lb = WeightedRoundRobin::new();
        let eps = endpoints(&[3, 2, 2]);
        picks(&lb, &eps, 2);

        let healthy = vec![eps[0].clone(), eps[2].clone()];
        let mut counts: HashMap<String, u32> = HashMap::new();
        for id in picks(&lb, &healthy, 5) {
            *counts.entry(id).or_default() += 1;
        }
        assert_eq!(counts["ep0"], 3);
        assert_eq!(counts["ep2"], 2);
    }
}
