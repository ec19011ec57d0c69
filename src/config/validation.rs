//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, rates > 0)
//! - Check that addresses and log filters parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::str::FromStr;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::schema::AppConfig;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
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

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.secret_key.trim().is_empty() {
        errors.push(ValidationError::new("secret_key", "must be set"));
    }

    if SocketAddr::from_str(&config.listener.bind_address).is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.cors.origins.iter().any(|o| o.trim().is_empty()) {
        errors.push(ValidationError::new("cors.origins", "contains an empty origin"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::new(
                "rate_limit.requests_per_second",
                "must be greater than 0",
            ));
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::new("rate_limit.burst_size", "must be greater than 0"));
        }
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }

    let observability = &config.observability;
    if let Err(e) = EnvFilter::try_new(&observability.log_level) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("invalid filter '{}': {}", observability.log_level, e),
        ));
    }

    if observability.file.enabled {
        if LevelFilter::from_str(&observability.file.level).is_err() {
            errors.push(ValidationError::new(
                "observability.file.level",
                format!("unknown level '{}'", observability.file.level),
            ));
        }
        if observability.file.directory.trim().is_empty() {
            errors.push(ValidationError::new("observability.file.directory", "must be set"));
        }
        if observability.file.max_files == 0 {
            errors.push(ValidationError::new(
                "observability.file.max_files",
                "must be greater than 0",
            ));
        }
    }

    if observability.tracing.enabled && observability.tracing.otlp_endpoint.trim().is_empty() {
        errors.push(ValidationError::new(
            "observability.tracing.otlp_endpoint",
            "must be set when tracing is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
