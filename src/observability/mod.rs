//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Dispatcher::stats (MetricsAggregator snapshot)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic increments, facade no-ops without an exporter)
//! - Health and circuit transitions are always logged

pub mod logging;
pub mod metrics;
