//! Single-listener protocol multiplexer.
//!
//! Serves a binary RPC protocol (gRPC over HTTP/2) and textual HTTP from one
//! port, with one middleware chain, one codec registry and one handler
//! signature shared by both.

// Call model
pub mod call;
pub mod codec;
pub mod error;
pub mod handler;
pub mod status;

// Protocol adapters
pub mod http;
pub mod rpc;

// Composition
pub mod middleware;
pub mod routing;
pub mod service;

// Runtime
pub mod app;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use app::{Application, ApplicationBuilder};
pub use call::{CallContext, Kind, Request, Response};
pub use config::AppConfig;
pub use error::Error;
pub use lifecycle::Shutdown;
pub use middleware::{Chain, Middleware, Next};
pub use routing::RouteTable;
pub use service::ServiceDescriptor;
pub use status::{Code, Status};
