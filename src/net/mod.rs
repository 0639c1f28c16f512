//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → mux.rs + classify.rs (shared listener only: pick a protocol)
//!     → prefixed.rs (replay the classified bytes)
//!     → serve.rs (hyper connection per protocol, graceful drain)
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore prevents resource exhaustion
//! - Servers accept through `Incoming` and never know whether a
//!   multiplexer sits in front of them
//! - Classification never loses bytes: what was read is replayed first

pub mod classify;
pub mod listener;
pub mod mux;
pub mod prefixed;
pub mod serve;

pub use classify::{Verdict, PREFACE};
pub use listener::{Accepted, ConnectionPermit, Incoming, Listener};
pub use mux::{split, MuxStats, Multiplexer};
pub use prefixed::PrefixedStream;
pub use serve::{serve, Drain, Protocol};
