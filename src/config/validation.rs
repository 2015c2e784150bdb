//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, burst >= 1, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a valid socket address")]
    InvalidBindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("rate_limit.requests_per_second must be a positive number, got {0}")]
    InvalidRate(f64),

    #[error("rate_limit.burst_size must be at least 1")]
    ZeroBurst,

    #[error("rate_limit.sweep_interval_secs must be greater than zero")]
    ZeroSweepInterval,

    #[error("rate_limit.idle_eviction_secs must be greater than zero")]
    ZeroIdleEviction,

    #[error("timeouts.request_timeout_ms must be greater than zero")]
    ZeroRequestTimeout,

    #[error("timeouts.shutdown_drain_ms must be greater than zero")]
    ZeroDrainTimeout,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroConnectionTimeout(&'static str),

    #[error("security.max_body_size must be greater than zero")]
    ZeroBodyLimit,

    #[error("cors.allowed_origins contains an empty entry")]
    EmptyOrigin,

    #[error("observability.metrics_address {0:?} is not a valid socket address")]
    InvalidMetricsAddress(String),
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    let rate = &config.rate_limit;
    if !(rate.requests_per_second.is_finite() && rate.requests_per_second > 0.0) {
        errors.push(ValidationError::InvalidRate(rate.requests_per_second));
    }
    if rate.burst_size == 0 {
        errors.push(ValidationError::ZeroBurst);
    }
    if rate.sweep_interval_secs == 0 {
        errors.push(ValidationError::ZeroSweepInterval);
    }
    if rate.idle_eviction_secs == 0 {
        errors.push(ValidationError::ZeroIdleEviction);
    }

    if config.timeouts.request_timeout_ms == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }
    if config.timeouts.shutdown_drain_ms == 0 {
        errors.push(ValidationError::ZeroDrainTimeout);
    }
    for (name, value) in [
        ("read_timeout_ms", config.timeouts.read_timeout_ms),
        ("write_timeout_ms", config.timeouts.write_timeout_ms),
        ("idle_timeout_ms", config.timeouts.idle_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroConnectionTimeout(name));
        }
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }
    if config.cors.allowed_origins.iter().any(|o| o.trim().is_empty()) {
        errors.push(ValidationError::EmptyOrigin);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
