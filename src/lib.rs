//! Traffic dispatch library.
//!
//! Picks the backend endpoint that should serve the next request, tracks
//! endpoint health, isolates failing endpoints behind circuit breakers and
//! keeps sticky client-to-endpoint bindings.

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod session;

pub use config::schema::DispatchConfig;
pub use error::{CallError, DispatchError};
pub use lifecycle::Shutdown;
pub use load_balancer::endpoint::Endpoint;
pub use load_balancer::pool::Dispatcher;
