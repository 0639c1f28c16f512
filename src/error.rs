//! Crate-wide error taxonomy.
//!
//! # Responsibilities
//! - One error type for every failure the core can surface
//! - Protocol-specific translation (HTTP status, binary status) in one place
//!
//! # Design Decisions
//! - `Configuration` is the only variant that aborts startup
//! - Every other variant is scoped to one call or one connection and is
//!   handled without touching the shared server tasks

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;

use crate::status::{Code, Status};

/// Errors raised by codecs and content negotiation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// No codec is registered for the request's content type token.
    #[error("no codec registered for content type `{token}`")]
    Unregistered { token: String },

    /// No codec is registered for the token the client asked to receive.
    #[error("no codec registered for accepted type `{token}`")]
    NotAcceptable { token: String },

    #[error("{codec} encode failed: {message}")]
    Encode { codec: String, message: String },

    #[error("{codec} decode failed: {message}")]
    Decode { codec: String, message: String },
}

impl CodecError {
    pub fn encode(codec: &str, err: impl std::fmt::Display) -> Self {
        Self::Encode {
            codec: codec.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(codec: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            codec: codec.to_string(),
            message: err.to_string(),
        }
    }
}

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration or registration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connection's prefix could not be read during classification.
    #[error("failed to classify connection from {peer}: {source}")]
    Classification {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Malformed request parameters or payload.
    #[error("binding error: {0}")]
    Binding(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Business failure returned by a handler or middleware.
    #[error(transparent)]
    Handler(#[from] Status),

    /// A protocol server did not drain within the grace period.
    #[error("{protocol} server did not drain within {grace:?}; forcing close")]
    Shutdown {
        protocol: &'static str,
        grace: Duration,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A server task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding(message.into())
    }

    /// HTTP status for a textual-protocol client.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::Binding(_) => StatusCode::BAD_REQUEST,
            Error::Codec(CodecError::Decode { .. }) => StatusCode::BAD_REQUEST,
            Error::Codec(CodecError::Unregistered { .. }) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Codec(CodecError::NotAcceptable { .. }) => StatusCode::NOT_ACCEPTABLE,
            Error::Codec(CodecError::Encode { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Handler(status) => status.code().http_status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Native status for a binary-protocol client.
    pub fn to_status(&self) -> Status {
        match self {
            Error::Handler(status) => status.clone(),
            Error::Binding(message) => Status::invalid_argument(message.clone()),
            Error::Codec(err @ CodecError::Decode { .. }) => Status::invalid_argument(err.to_string()),
            Error::Codec(err @ CodecError::Unregistered { .. }) => {
                Status::unimplemented(err.to_string())
            }
            other => Status::internal(other.to_string()),
        }
    }

    /// Stable code string used in textual error bodies.
    pub fn code(&self) -> Code {
        match self {
            Error::Handler(status) => status.code(),
            Error::Binding(_) | Error::Codec(CodecError::Decode { .. }) => Code::InvalidArgument,
            Error::Codec(CodecError::Unregistered { .. })
            | Error::Codec(CodecError::NotAcceptable { .. }) => Code::Unimplemented,
            _ => Code::Internal,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
