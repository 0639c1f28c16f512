//! Textual protocol adapter.
//!
//! # Data Flow
//! ```text
//! HTTP/1.1 or h2c connection (from the multiplexer or a dedicated listener)
//!     → server.rs (Axum router, route lookup, Accept negotiation)
//!     → binder.rs (path, query, form, multipart, codec body → typed request)
//!     → middleware chain → handler
//!     → response.rs (encode reply or error, flush outgoing headers)
//! ```

pub mod binder;
pub mod response;
pub mod server;

pub use binder::Binder;
pub use server::{HttpServer, HttpSettings, HEALTHZ_PATH};
