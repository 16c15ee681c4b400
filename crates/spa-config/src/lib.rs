//! Configuration parsing and validation for spad
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Daemon settings (data directory, resync interval, workers, backoff)
//! - Target baselines and schedule definitions
//! - Validation with clear error messages; window-format problems are
//!   warnings so the schedule still loads and is reported at runtime

mod manifest;
mod schema;
mod validation;

pub use manifest::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Manifest> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Manifest> {
    let raw: RawConfig = toml::from_str(content)?;

    // Check version
    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    // Validate
    let (errors, warnings): (Vec<_>, Vec<_>) = validate_config(&raw)
        .into_iter()
        .partition(ValidationError::is_fatal);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }
    for warning in &warnings {
        warn!(warning = %warning, "Configuration warning");
    }

    Ok(Manifest::from_raw(raw, warnings))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;
