//! Client-key affinity by hashing.
//!
//! `modulo` mode maps `hash(key) % healthy_count`. Any change in the healthy
//! count remaps most keys, so a single health flap moves almost every client.
//! `consistent` mode places `virtual_nodes` points per endpoint on a hash ring;
//! only the keys owned by the endpoint that changed move.
//!
//! Requests without a client key fall back to round-robin.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{Algorithm, HashMode, IpHashConfig};
use crate::load_balancer::{endpoint::Endpoint, round_robin::RoundRobin, LoadBalancer};

/// 64-bit FNV-1a. Stable across processes and releases, unlike `DefaultHasher`.
pub fn fnv1a(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    key.bytes().fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

#[derive(Debug, Default)]
struct Ring {
    members: Vec<String>,
    points: BTreeMap<u64, usize>,
}

impl Ring {
    fn rebuild(&mut self, candidates: &[Arc<Endpoint>], virtual_nodes: u32) {
        self.members = candidates.iter().map(|ep| ep.id.clone()).collect();
        self.points.clear();
        for (index, ep) in candidates.iter().enumerate() {
            for v in 0..virtual_nodes {
                self.points.insert(fnv1a(&format!("{}#{}", ep.id, v)), index);
            }
        }
    }

    fn is_current(&self, candidates: &[Arc<Endpoint>]) -> bool {
        self.members.len() == candidates.len()
            && self.members.iter().zip(candidates).all(|(id, ep)| *id == ep.id)
    }

    fn lookup(&self, hash: u64) -> Option<usize> {
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, index)| *index)
    }
}

/// IP-hash selector.
#[derive(Debug)]
pub struct IpHash {
    mode: HashMode,
    virtual_nodes: u32,
    ring: Mutex<Ring>,
    fallback: RoundRobin,
}

impl IpHash {
    pub fn new(config: &IpHashConfig) -> Self {
        Self {
            mode: config.mode,
            virtual_nodes: config.virtual_nodes.max(1),
            ring: Mutex::new(Ring::default()),
            fallback: RoundRobin::new(),
        }
    }
}

impl LoadBalancer for IpHash {
    fn next_endpoint(&self, candidates: &[Arc<Endpoint>], client_key: Option<&str>) -> Option<Arc<Endpoint>> {
        if candidates.is_empty() {
            return None;
        }
        let Some(key) = client_key else {
            return self.fallback.next_endpoint(candidates, None);
        };

        let hash = fnv1a(key);
        let index = match self.mode {
            HashMode::Modulo => (hash % candidates.len() as u64) as usize,
            HashMode::Consistent => {
                let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
                if !ring.is_current(candidates) {
                    ring.rebuild(candidates, self.virtual_nodes);
                }
                ring.lookup(hash)?
            }
        };

        Some(candidates[index].clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::IpHash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoints;

    fn modulo() -> IpHash {
        IpHash::new(&IpHashConfig::default())
    }

    fn consistent() -> IpHash {
        IpHash::new(&IpHashConfig {
            mode: HashMode::Consistent,
            virtual_nodes: 64,
        })
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_same_key_same_endpoint() {
        let eps = endpoints(&[1, 1, 1, 1]);
        for lb in [modulo(), consistent()] {
            let first = lb.next_endpoint(&eps, Some("10.0.0.7")).unwrap();
            for _ in 0..10 {
                assert_eq!(lb.next_endpoint(&eps, Some("10.0.0.7")).unwrap().id, first.id);
            }
        }
    }

    #[test]
    fn test_missing_key_rotates() {
        let lb = modulo();
        let eps = endpoints(&[1, 1]);
        let a = lb.next_endpoint(&eps, None).unwrap();
        let b = lb.next_endpoint(&eps, None).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_consistent_mode_moves_only_lost_keys() {
        let lb = consistent();
        let eps = endpoints(&[1, 1, 1, 1]);
        let keys: Vec<String> = (0..200).map(|i| format!("client-{}", i)).collect();

        let before: Vec<String> = keys
            .iter()
            .map(|k| lb.next_endpoint(&eps, Some(k)).unwrap().id.clone())
            .collect();

        let survivors: Vec<_> = eps.iter().filter(|ep| ep.id != "ep2").cloned().collect();
        for (key, owner) in keys.iter().zip(&before) {
            let now = lb.next_endpoint(&survivors, Some(key)).unwrap();
            if owner != "ep2" {
                assert_eq!(&now.id, owner, "key {} moved without cause", key);
            }
        }
    }
}
