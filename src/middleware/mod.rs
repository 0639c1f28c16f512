//! Cross-protocol middleware chain.
//!
//! # Data Flow
//! ```text
//! adapter builds CallContext
//!     → Chain::run(ctx, endpoint)
//!         → mw[0].handle(ctx, next) ─► mw[1].handle(ctx, next) ─► … ─► endpoint.call(ctx)
//!         ◄──────────────── Result<Reply, Error> flows back out ◄────────────────┘
//!     → adapter flushes ctx's outgoing headers, writes reply or error
//! ```
//!
//! # Design Decisions
//! - Registration order is execution order: `mw[0]` wraps `mw[1]` wraps the endpoint
//! - A middleware short-circuits by returning without calling `next`
//! - Middleware never sees a protocol object; it switches on `ctx.kind()`
//!   when behavior must differ

pub mod headers;
pub mod logging;
pub mod metrics;
pub mod recover;
pub mod request_id;

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::call::{CallContext, Reply};
use crate::error::Error;

pub use headers::SetHeader;
pub use logging::Logging;
pub use metrics::Metrics;
pub use recover::Recover;
pub use request_id::RequestId;

/// Decorator around the rest of the call.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error>;
}

/// Innermost step of a chain.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &mut CallContext) -> Result<Reply, Error>;
}

/// Continuation handed to a middleware: the remaining layers plus the endpoint.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    layers: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(layers: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { layers, endpoint }
    }

    /// Runs the rest of the chain.
    pub async fn run(self, ctx: &mut CallContext) -> Result<Reply, Error> {
        match self.layers.split_first() {
            Some((layer, rest)) => layer.handle(ctx, Next::new(rest, self.endpoint)).await,
            None => self.endpoint.call(ctx).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.layers.len())
            .finish_non_exhaustive()
    }
}

/// Ordered list of middleware composed into one.
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new(layers: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Extends the chain. Existing members keep their positions.
    pub fn append(mut self, more: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        self.layers.extend(more);
        self
    }

    pub fn push(&mut self, layer: Arc<dyn Middleware>) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs every layer around `endpoint`.
    pub async fn run(&self, ctx: &mut CallContext, endpoint: &dyn Endpoint) -> Result<Reply, Error> {
        Next::new(&self.layers, endpoint).run(ctx).await
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.layers.len()).finish()
    }
}

/// Resumes an outer chain once a nested chain reaches its end.
struct Resume<'a>(Next<'a>);

#[async_trait]
impl Endpoint for Resume<'_> {
    async fn call(&self, ctx: &mut CallContext) -> Result<Reply, Error> {
        self.0.run(ctx).await
    }
}

/// Endpoint standing in for a call whose request could not be bound, so the
/// failure still passes through the chain.
pub(crate) struct Rejected(Mutex<Option<Error>>);

impl Rejected {
    pub(crate) fn new(err: Error) -> Self {
        Self(Mutex::new(Some(err)))
    }
}

#[async_trait]
impl Endpoint for Rejected {
    async fn call(&self, _ctx: &mut CallContext) -> Result<Reply, Error> {
        let err = self.0.lock().ok().and_then(|mut slot| slot.take());
        Err(err.unwrap_or_else(|| Error::binding("request was rejected")))
    }
}

#[async_trait]
impl Middleware for Chain {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        self.run(ctx, &Resume(next)).await
    }
}
