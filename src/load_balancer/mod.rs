//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher::next_endpoint(client_key)
//!     → registry.rs (snapshot: all endpoints + healthy subset)
//!     → session::sticky (existing binding for client_key?)
//!     → Apply selection algorithm over the healthy subset:
//!         - round_robin.rs (rotate through healthy endpoints)
//!         - weighted.rs (smooth weighted round-robin)
//!         - least_conn.rs (fewest in-flight requests)
//!         - random.rs (uniform pick)
//!         - ip_hash.rs (client key affinity, modulo or ring)
//!         - alter.rs (adaptive latency/load/error scoring)
//!     → pool.rs returns the endpoint or NoHealthyEndpoints
//! ```
//!
//! # Design Decisions
//! - Strategies only read endpoint state; accounting goes through the registry
//! - One algorithm per dispatcher, picked from a closed enum
//! - Unhealthy endpoints never reach a strategy

pub mod alter;
pub mod endpoint;
pub mod ip_hash;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::fmt::Debug;
use std::sync::Arc;

use crate::config::{Algorithm, DispatchConfig};
use self::endpoint::Endpoint;

/// A selection strategy over the healthy endpoint list.
///
/// Implementations keep only their own cursor/table state and must be safe
/// to call from many dispatches at once.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick one of `candidates`, or `None` when the slice is empty.
    fn next_endpoint(
        &self,
        candidates: &[Arc<Endpoint>],
        client_key: Option<&str>,
    ) -> Option<Arc<Endpoint>>;

    /// The algorithm this strategy implements.
    fn algorithm(&self) -> Algorithm;
}

/// Build the strategy named by `config.algorithm`.
pub fn build_strategy(config: &DispatchConfig) -> Box<dyn LoadBalancer> {
    match config.algorithm {
        Algorithm::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        Algorithm::WeightedRoundRobin => Box::new(weighted::WeightedRoundRobin::new()),
        Algorithm::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        Algorithm::Random => Box::new(random::Random::new()),
        Algorithm::IpHash => Box::new(ip_hash::IpHash::new(&config.ip_hash)),
        Algorithm::Alter => Box::new(alter::Alter::new(config.alter.clone())),
    }
}

#[cfg(test)]
pub(crate) fn endpoints(weights: &[u32]) -> Vec<Arc<Endpoint>> {
    weights
        .iter()
        .enumerate()
        .map(|(i, w)| Arc::new(Endpoint::new(format!("ep{}", i), *w)))
        .collect()
}
