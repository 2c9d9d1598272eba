//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffer sizes, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Checks every semantic constraint and reports all violations.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }

    if config.target.host.trim().is_empty() {
        errors.push(ValidationError::new("target.host", "must not be empty"));
    }
    if config.target.port == 0 {
        errors.push(ValidationError::new("target.port", "must not be 0"));
    }

    if config.timeouts.socket_secs == 0 {
        errors.push(ValidationError::new("timeouts.socket_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }

    // Chunk framing needs room beyond the header itself.
    if config.connection.socket_buffer_size < 64 {
        errors.push(ValidationError::new("connection.socket_buffer_size", "must be at least 64 bytes"));
    }
    if config.connection.pipe_buffer_size == 0 {
        errors.push(ValidationError::new("connection.pipe_buffer_size", "must be greater than 0"));
    }
    if config.connection.max_head_size < 256 {
        errors.push(ValidationError::new("connection.max_head_size", "must be at least 256 bytes"));
    }

    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
