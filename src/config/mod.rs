//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; it is built once and passed by reference
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, BindingConfig, CodecsConfig, GrpcConfig, HttpConfig, ListenerConfig, LogFormat,
    MatchMode, MuxConfig, ObservabilityConfig, ShutdownConfig,
};
pub use validation::{validate_config, ValidationError};
