//! Per-call structured logging.

use async_trait::async_trait;

use crate::call::{CallContext, Reply};
use crate::error::Error;
use crate::middleware::{Middleware, Next};

/// Logs one event per call: kind, method, path, payload, duration and the
/// outcome. Failures are logged at `error`, successes at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logging {
    headers: bool,
}

impl Logging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log incoming headers.
    pub fn with_headers(mut self) -> Self {
        self.headers = true;
        self
    }
}

#[async_trait]
impl Middleware for Logging {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        let result = next.run(ctx).await;

        let duration_ms = ctx.elapsed().as_secs_f64() * 1000.0;
        let headers = self.headers.then(|| format!("{:?}", ctx.request_headers()));
        match &result {
            Ok(_) => tracing::info!(
                kind = %ctx.kind(),
                method = ctx.method(),
                path = ctx.path(),
                payload = ?ctx.payload(),
                headers = headers.as_deref(),
                duration_ms,
                "Call completed"
            ),
            Err(err) => tracing::error!(
                kind = %ctx.kind(),
                method = ctx.method(),
                path = ctx.path(),
                payload = ?ctx.payload(),
                headers = headers.as_deref(),
                duration_ms,
                error = %err,
                "Call failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::tests::{ctx, Terminal, Trace};
    use crate::middleware::Chain;
    use std::sync::Arc;

    #[tokio::test]
    async fn passes_result_through() {
        let trace = Trace::default();
        let chain = Chain::new([Arc::new(Logging::new().with_headers()) as Arc<dyn Middleware>]);
        let reply = chain.run(&mut ctx(), &Terminal(Arc::clone(&trace))).await;
        assert!(reply.is_ok());
        assert_eq!(*trace.lock().unwrap(), ["H"]);
    }
}
