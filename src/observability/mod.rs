//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Middleware (Logging, Metrics) and the multiplexer produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms via the metrics facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (binary only)
//! ```
//!
//! # Design Decisions
//! - The core never formats or ships telemetry itself; it emits events and
//!   the subscriber/recorder installed by the binary decides where they go
//! - Request ids flow through `middleware::RequestId`

pub mod logging;
pub mod metrics;
