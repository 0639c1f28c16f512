//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::codec::Registry;
use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::error::Error;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Parses and validates a TOML document.
pub fn parse_config(content: &str, codecs: &Registry) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;
    validate_config(&config, codecs).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file against the global
/// codec registry.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, &Registry::global())
}
