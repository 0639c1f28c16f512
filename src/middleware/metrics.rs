//! Per-call counters and latency histograms.

use async_trait::async_trait;

use crate::call::{CallContext, Reply};
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::observability::metrics;

/// Records `twinport_calls_total` and `twinport_call_duration_seconds`,
/// labelled by protocol kind and outcome code.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

#[async_trait]
impl Middleware for Metrics {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        let result = next.run(ctx).await;
        let code = match &result {
            Ok(_) => crate::status::Code::Ok,
            Err(err) => err.code(),
        };
        metrics::record_call(ctx.kind(), code, ctx.elapsed());
        result
    }
}
