//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_signal resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger → background tasks leave their loops → drain with deadline
//! ```
//!
//! # Design Decisions
//! - One broadcast channel for every background task
//! - Shutdown has a deadline: stuck tasks are aborted

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
