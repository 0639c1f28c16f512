//! Request correlation ids.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use uuid::Uuid;

use crate::call::{CallContext, Reply};
use crate::error::Error;
use crate::middleware::{Middleware, Next};

/// Header carrying the correlation id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Id assigned to the current call, readable from `CallContext::extensions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallId(pub String);

/// Reuses the caller's `x-request-id` or generates a UUID v4, stores it in
/// the context's extensions and echoes it on the reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestId;

#[async_trait]
impl Middleware for RequestId {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        let value = ctx
            .request_headers()
            .get(&X_REQUEST_ID)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| {
                // A UUID is always a valid header value.
                HeaderValue::from_str(&Uuid::new_v4().to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
            });

        if let Ok(text) = value.to_str() {
            ctx.extensions_mut().insert(CallId(text.to_string()));
        }

        let result = next.run(ctx).await;
        ctx.response_headers_mut().insert(X_REQUEST_ID, value);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::tests::{Terminal, Trace};
    use crate::middleware::Chain;
    use axum::http::HeaderMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn chain() -> Chain {
        Chain::new([Arc::new(RequestId) as Arc<dyn Middleware>])
    }

    #[tokio::test]
    async fn propagates_incoming_id() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        let mut ctx = CallContext::textual("GET", "/", headers, CancellationToken::new());

        chain().run(&mut ctx, &Terminal(Trace::default())).await.unwrap();

        assert_eq!(ctx.response_headers().get(X_REQUEST_ID).unwrap(), "abc-123");
        assert_eq!(ctx.extensions().get::<CallId>(), Some(&CallId("abc-123".into())));
    }

    #[tokio::test]
    async fn generates_uuid_when_missing() {
        let mut ctx = CallContext::textual("GET", "/", HeaderMap::new(), CancellationToken::new());
        chain().run(&mut ctx, &Terminal(Trace::default())).await.unwrap();

        let id = ctx.response_headers().get(X_REQUEST_ID).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
