//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files and
//! every field has a default, so an empty file is a valid configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name, logged at start.
    pub name: String,

    /// Application version, logged at start.
    pub version: String,

    /// Shared listener (used when protocols have no dedicated address).
    pub listener: ListenerConfig,

    /// Textual protocol server.
    pub http: HttpConfig,

    /// Binary protocol server.
    pub grpc: GrpcConfig,

    /// Connection classification.
    pub mux: MuxConfig,

    /// Codec selection.
    pub codecs: CodecsConfig,

    /// Request binding for the textual protocol.
    pub binding: BindingConfig,

    pub shutdown: ShutdownConfig,

    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            listener: ListenerConfig::default(),
            http: HttpConfig::default(),
            grpc: GrpcConfig::default(),
            mux: MuxConfig::default(),
            codecs: CodecsConfig::default(),
            binding: BindingConfig::default(),
            shutdown: ShutdownConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Network type. Only `tcp` is supported.
    pub network: String,

    /// Bind address (e.g., "0.0.0.0:8080"). Absent means a dynamic
    /// loopback port.
    pub address: Option<String>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            address: None,
            max_connections: 10_000,
        }
    }
}

/// Textual protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,

    /// Dedicated bind address; disables multiplexing.
    pub address: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Serve `GET /debug/healthz`.
    pub healthz: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: None,
            request_timeout_secs: 30,
            healthz: true,
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Binary protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub enabled: bool,

    /// Dedicated bind address; disables multiplexing.
    pub address: Option<String>,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: None,
        }
    }
}

/// How the multiplexer recognises a binary-protocol connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// HTTP/2 preface and a matching `content-type` in the first header block.
    #[default]
    ContentType,
    /// HTTP/2 preface alone.
    Preface,
}

/// Connection multiplexer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Upper bound on classifying one connection, in milliseconds.
    pub classify_timeout_ms: u64,

    /// In `content_type` mode a client that sends the preface and then waits
    /// for the server's SETTINGS (grpc-go, grpc-java) is routed binary only
    /// once `classify_timeout_ms` expires. Use `preface` mode or a short
    /// timeout when such clients share the port with h2c textual traffic.
    pub match_mode: MatchMode,

    /// `content-type` prefix identifying the binary protocol.
    pub content_type_prefix: String,

    /// Maximum bytes buffered while classifying.
    pub max_classify_bytes: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            classify_timeout_ms: 5_000,
            match_mode: MatchMode::ContentType,
            content_type_prefix: "application/grpc".to_string(),
            max_classify_bytes: 16 * 1024,
        }
    }
}

impl MuxConfig {
    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classify_timeout_ms)
    }
}

/// Codec selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecsConfig {
    /// Codec for textual requests and responses without a usable header.
    pub default: String,

    /// Codec for binary calls sent as plain `application/grpc`.
    pub binary_default: String,

    /// Use `default` for unregistered request content types instead of 415.
    pub fallback_to_default: bool,
}

impl Default for CodecsConfig {
    fn default() -> Self {
        Self {
            default: "json".to_string(),
            binary_default: "json".to_string(),
            fallback_to_default: false,
        }
    }
}

/// Request binding for the textual protocol.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BindingConfig {
    /// On read-only verbs, let query parameters replace path variables of
    /// the same name.
    pub query_overrides_path: bool,

    /// Maximum request body size.
    pub max_body_bytes: usize,

    /// Maximum multipart body size.
    pub max_multipart_bytes: u64,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            query_overrides_path: false,
            max_body_bytes: 4 * 1024 * 1024,
            max_multipart_bytes: 32 << 20,
        }
    }
}

/// Graceful shutdown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight calls get to finish before connections are closed.
    pub grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_ms: 10_000 }
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Prometheus scrape address. Absent disables the exporter.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_address: None,
        }
    }
}

/// Parses an optional address field.
pub(crate) fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, String> {
    value
        .parse()
        .map_err(|e| format!("{field}: invalid socket address `{value}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.http.enabled && config.grpc.enabled);
        assert_eq!(config.codecs.default, "json");
        assert_eq!(config.mux.match_mode, MatchMode::ContentType);
        assert!(config.listener.address.is_none());
    }

    #[test]
    fn parses_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            name = "greeter"

            [listener]
            address = "127.0.0.1:7000"

            [mux]
            match_mode = "preface"

            [binding]
            query_overrides_path = true

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "greeter");
        assert_eq!(config.listener.address.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(config.mux.match_mode, MatchMode::Preface);
        assert!(config.binding.query_overrides_path);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
