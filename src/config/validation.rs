//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and endpoint
//! integrity. Every problem is reported, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{DispatchConfig, EndpointConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("endpoint #{index} has an empty id")]
    EmptyEndpointId { index: usize },

    #[error("duplicate endpoint id `{0}`")]
    DuplicateEndpoint(String),

    #[error("endpoint `{0}` has weight 0 (must be > 0)")]
    ZeroWeight(String),

    #[error("endpoint `{id}` has invalid url `{url}`")]
    InvalidUrl { id: String, url: String },

    #[error("`{field}` must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("`{field}` must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("`{field}` is not a socket address: `{value}`")]
    InvalidAddress { field: &'static str, value: String },
}

/// Validate the endpoint list on its own.
///
/// Used both by [`validate_config`] and by registry construction, so a
/// registry can never hold a malformed endpoint.
pub fn validate_endpoints(endpoints: &[EndpointConfig]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, endpoint) in endpoints.iter().enumerate() {
        if endpoint.id.trim().is_empty() {
            errors.push(ValidationError::EmptyEndpointId { index });
            continue;
        }
        if !seen.insert(endpoint.id.as_str()) {
            errors.push(ValidationError::DuplicateEndpoint(endpoint.id.clone()));
        }
        if endpoint.weight == 0 {
            errors.push(ValidationError::ZeroWeight(endpoint.id.clone()));
        }
        if let Some(url) = &endpoint.url {
            if Url::parse(url).is_err() {
                errors.push(ValidationError::InvalidUrl {
                    id: endpoint.id.clone(),
                    url: url.clone(),
                });
            }
        }
    }

    errors
}

/// Validate a full configuration.
pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_endpoints(&config.endpoints);

    let positive: [(&'static str, u64); 8] = [
        ("health_check.interval_ms", config.health_check.interval_ms),
        ("health_check.timeout_ms", config.health_check.timeout_ms),
        ("health_check.failure_threshold", config.health_check.failure_threshold as u64),
        ("health_check.success_threshold", config.health_check.success_threshold as u64),
        ("health_check.max_concurrent_probes", config.health_check.max_concurrent_probes as u64),
        ("circuit_breaker.failure_threshold", config.circuit_breaker.failure_threshold as u64),
        ("circuit_breaker.success_threshold", config.circuit_breaker.success_threshold as u64),
        ("circuit_breaker.half_open_max_calls", config.circuit_breaker.half_open_max_calls as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }

    if config.circuit_breaker.monitoring_period_ms == 0 {
        errors.push(ValidationError::NotPositive {
            field: "circuit_breaker.monitoring_period_ms",
        });
    }
    if config.sticky_session.ttl_ms == 0 {
        errors.push(ValidationError::NotPositive { field: "sticky_session.ttl_ms" });
    }
    if config.stats.latency_window == 0 {
        errors.push(ValidationError::NotPositive { field: "stats.latency_window" });
    }
    if config.ip_hash.virtual_nodes == 0 {
        errors.push(ValidationError::NotPositive { field: "ip_hash.virtual_nodes" });
    }

    let ranged = [
        ("stats.error_rate_alpha", config.stats.error_rate_alpha, f64::MIN_POSITIVE, 1.0),
        ("alter.jitter", config.alter.jitter, 0.0, 0.99),
        ("alter.epsilon_ms", config.alter.epsilon_ms, f64::MIN_POSITIVE, f64::MAX),
        ("alter.load_weight", config.alter.load_weight, 0.0, f64::MAX),
    ];
    for (field, value, min, max) in ranged {
        if !(min..=max).contains(&value) {
            errors.push(ValidationError::OutOfRange { field, min, max, value });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }
    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "admin.bind_address",
            value: config.admin.bind_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
