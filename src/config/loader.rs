//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_SECRET_KEY: &str = "APP_SECRET_KEY";
pub const ENV_BIND_ADDRESS: &str = "APP_BIND_ADDRESS";
pub const ENV_CORS_ORIGINS: &str = "BACKEND_CORS_ORIGINS";
pub const ENV_LOG_LEVEL: &str = "APP_LOG_LEVEL";
pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot read env file: {0}")]
    EnvFile(String),

    #[error("Invalid environment variable {name}: {reason}")]
    Env { name: &'static str, reason: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    finish(config, |name| std::env::var(name).ok())
}

/// Export the `KEY=value` pairs of a dotenv file into the process environment.
///
/// Variables already set win over the file. With no path, `.env` is looked
/// up from the working directory upwards and may be absent.
pub fn load_env_file(path: Option<&Path>) -> Result<(), ConfigError> {
    let result = match path {
        Some(path) => dotenv::from_path(path),
        None => match dotenv::dotenv() {
            Err(e) if e.not_found() => Ok(()),
            other => other.map(|_| ()),
        },
    };
    result.map_err(|e| ConfigError::EnvFile(e.to_string()))
}

/// Build configuration from defaults plus environment overrides, then validate.
pub fn load_from_env() -> Result<AppConfig, ConfigError> {
    finish(AppConfig::default(), |name| std::env::var(name).ok())
}

fn finish<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment values on top of a parsed configuration.
///
/// `lookup` resolves a variable name to its value; unset variables are `None`.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secret) = lookup(ENV_SECRET_KEY) {
        config.secret_key = secret;
    }
    if let Some(addr) = lookup(ENV_BIND_ADDRESS) {
        config.listener.bind_address = addr;
    }
    if let Some(origins) = lookup(ENV_CORS_ORIGINS) {
        config.cors.origins = parse_cors_origins(&origins).map_err(|reason| ConfigError::Env {
            name: ENV_CORS_ORIGINS,
            reason,
        })?;
    }
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.observability.log_level = level;
    }
    if let Some(endpoint) = lookup(ENV_OTLP_ENDPOINT) {
        config.observability.tracing.otlp_endpoint = endpoint;
    }
    Ok(())
}

/// Parse an origin list given either as `a, b, c` or as a JSON array.
pub fn parse_cors_origins(raw: &str) -> Result<Vec<String>, String> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(raw).map_err(|e| e.to_string());
    }
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}
