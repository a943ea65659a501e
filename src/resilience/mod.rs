//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatched call to endpoint:
//!     → circuit_breaker.rs (reject fast if open, admit trials if half-open)
//!     → injected transport call
//!     → circuit_breaker.rs (record outcome, open/close circuit)
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents cascading failures
//! - Retries and backoff belong to the caller; the dispatcher never retries

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitError, CircuitState, CircuitStats};
