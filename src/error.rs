//! Dispatch-time error types.
//!
//! Probe errors live in `health::probe`, configuration errors in
//! `config::loader` and breaker rejections in `resilience::circuit_breaker`.

use thiserror::Error;

/// Selection could not produce an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Zero healthy endpoints at selection time.
    #[error("no healthy endpoints available ({total} configured)")]
    NoHealthyEndpoints { total: usize },
}

/// Failure of a full dispatched call (selection, breaker, upstream).
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The selected endpoint's breaker rejected the call without running it.
    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen { endpoint: String },

    /// The injected transport returned an error.
    #[error("upstream call failed: {0}")]
    Upstream(E),
}

impl<E> CallError<E> {
    /// True when the call never reached the endpoint.
    pub fn is_rejected(&self) -> bool {
        !matches!(self, CallError::Upstream(_))
    }
}
