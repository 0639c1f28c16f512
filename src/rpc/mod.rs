//! Binary RPC protocol subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP/2 request (POST /pkg.Service/Method, content-type application/grpc[+codec])
//!     → server.rs (method lookup, codec from subtype)
//!     → frame.rs (unwrap the length-prefixed message)
//!     → CallContext + middleware chain + handler
//!     → frame.rs (wrap reply) + grpc-status trailers
//! ```
//!
//! # Design Decisions
//! - Messages are encoded with the same codec registry the textual protocol
//!   uses; the `+token` subtype picks the codec
//! - Compression is not supported and is reported as Unimplemented

pub mod frame;
pub mod server;

pub use server::{GrpcServer, GrpcSettings, MethodHandler, MethodTable, GRPC_CONTENT_TYPE};
