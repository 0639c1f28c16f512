//! Unified call model.
//!
//! # Data Flow
//! ```text
//! textual request ─┐                          ┌─► Request<T> ─► handler
//!                  ├─► CallContext ─► chain ──┤
//! binary request ──┘                          └─◄ Response<T> ◄─ handler
//!                         │
//!                         └─ outgoing headers flushed once by the adapter
//! ```
//!
//! # Design Decisions
//! - One flat struct tagged by `Kind`; no protocol object is embedded
//! - Payloads and replies are type-erased through `Message`, so middleware
//!   can log them without knowing the concrete type
//! - Handlers see typed `Request<T>` / `Response<T>` values

pub mod context;
pub mod message;
pub mod request;

pub use context::{CallContext, Kind};
pub use message::{Empty, Message, Reply};
pub use request::{FilePart, PathParams, Request, Response};
