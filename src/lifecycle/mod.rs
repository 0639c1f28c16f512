//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → plan listeners → (split with multiplexer) → start servers
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → drain connections → force after grace
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listeners, then servers
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has a deadline: in-flight calls are cancelled after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{plan_listeners, ListenerPlan, Prebound};
