//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that configured codec tokens are registered
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::codec::Registry;
use crate::config::schema::{parse_addr, AppConfig};
use crate::net::classify::PREFACE;

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
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

/// Checks `config` against itself and the codec registry.
pub fn validate_config(config: &AppConfig, codecs: &Registry) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.http.enabled && !config.grpc.enabled {
        errors.push(ValidationError::new(
            "http.enabled",
            "at least one of http and grpc must be enabled",
        ));
    }

    if !config.listener.network.eq_ignore_ascii_case("tcp") {
        errors.push(ValidationError::new(
            "listener.network",
            format!("unsupported network `{}`", config.listener.network),
        ));
    }

    let addresses = [
        ("listener.address", config.listener.address.as_deref()),
        ("http.address", config.http.address.as_deref()),
        ("grpc.address", config.grpc.address.as_deref()),
        (
            "observability.metrics_address",
            config.observability.metrics_address.as_deref(),
        ),
    ];
    for (field, value) in addresses {
        if let Some(Err(message)) = value.map(|v| parse_addr(field, v)) {
            errors.push(ValidationError::new(field, message));
        }
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.mux.classify_timeout_ms == 0 {
        errors.push(ValidationError::new("mux.classify_timeout_ms", "must be greater than 0"));
    }

    if config.mux.max_classify_bytes < PREFACE.len() {
        errors.push(ValidationError::new(
            "mux.max_classify_bytes",
            format!("must be at least {} (the HTTP/2 preface)", PREFACE.len()),
        ));
    }

    if config.http.request_timeout_secs == 0 {
        errors.push(ValidationError::new("http.request_timeout_secs", "must be greater than 0"));
    }

    for (field, token) in [
        ("codecs.default", &config.codecs.default),
        ("codecs.binary_default", &config.codecs.binary_default),
    ] {
        if !codecs.contains(token) {
            errors.push(ValidationError::new(
                field,
                format!("codec `{token}` is not registered"),
            ));
        }
    }

    if config.shutdown.grace_ms == 0 {
        errors.push(ValidationError::new("shutdown.grace_ms", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
