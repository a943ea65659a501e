//! Session affinity subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch with client key:
//!     → sticky.rs (local DashMap, then optional store)
//!     → hit: bound endpoint
//!     → miss: strategy selection, new binding mirrored to store.rs
//! ```

pub mod sticky;
pub mod store;

pub use sticky::{StickySession, StickySessionManager};
pub use store::{MemoryStore, SessionStore, StoreError};
