//! Routing subsystem for the textual protocol.
//!
//! # Data Flow
//! ```text
//! Registration (before start):
//!     table.get("/greet/{name}", handler)
//!     table.group("/api").layer(mw).post("/users", handler)
//!     → RouteTable (matchit template tree + per-verb entries)
//!
//! Per request:
//!     (verb, path) → RouteTable::lookup()
//!     → Found { route, params } | MethodNotAllowed { allow } | NotFound
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Conflicts and duplicates are registration errors, never runtime panics
//! - Deterministic: same input always matches same route

pub mod group;
pub mod table;

pub use group::Group;
pub use table::{Lookup, MethodFilter, RouteEntry, RouteTable};
