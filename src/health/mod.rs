//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → probe.rs (HTTP GET or TCP connect, bounded by timeout)
//!     → Update endpoint health via state.rs thresholds
//!
//! Passive health checks (EndpointRegistry::record_end):
//!     Request outcome observed
//!     → Same thresholds, same state machine
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Probe failures are logged and counted, never fatal

pub mod active;
pub mod probe;
pub mod state;

pub use active::{CycleReport, HealthMonitor};
pub use probe::{build_probe, HttpProbe, Probe, ProbeError, TcpProbe};
pub use state::{HealthThresholds, HealthTransition};
