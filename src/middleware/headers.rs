//! Outgoing header injection.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use crate::call::{CallContext, Kind, Reply};
use crate::error::Error;
use crate::middleware::{Middleware, Next};

/// Appends a fixed header to every reply, optionally only for one protocol.
///
/// The header is added after the inner layers return, so it is present on
/// both successful and failed calls.
#[derive(Debug, Clone)]
pub struct SetHeader {
    name: HeaderName,
    value: HeaderValue,
    only: Option<Kind>,
}

impl SetHeader {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self {
            name,
            value,
            only: None,
        }
    }

    /// Parses `name` and `value`, failing with a configuration error.
    pub fn try_new(name: &str, value: &str) -> Result<Self, Error> {
        let name = HeaderName::try_from(name)
            .map_err(|e| Error::configuration(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::configuration(format!("invalid value for `{name}`: {e}")))?;
        Ok(Self::new(name, value))
    }

    pub fn only(mut self, kind: Kind) -> Self {
        self.only = Some(kind);
        self
    }
}

#[async_trait]
impl Middleware for SetHeader {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        let result = next.run(ctx).await;
        if self.only.map_or(true, |kind| kind == ctx.kind()) {
            ctx.response_headers_mut()
                .append(self.name.clone(), self.value.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::tests::{ctx, Terminal, Trace};
    use crate::middleware::Chain;
    use axum::http::HeaderMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn appends_header_once() {
        let chain = Chain::new([Arc::new(SetHeader::try_new("x-trace", "1").unwrap()) as Arc<dyn Middleware>]);
        let mut ctx = ctx();
        chain.run(&mut ctx, &Terminal(Trace::default())).await.unwrap();
        assert_eq!(ctx.response_headers().get_all("x-trace").iter().count(), 1);
    }

    #[tokio::test]
    async fn kind_restriction_skips_other_protocol() {
        let layer = SetHeader::try_new("x-trace", "1").unwrap().only(Kind::Textual);
        let chain = Chain::new([Arc::new(layer) as Arc<dyn Middleware>]);
        let mut ctx = CallContext::binary("/svc.S/M", HeaderMap::new(), CancellationToken::new());
        chain.run(&mut ctx, &Terminal(Trace::default())).await.unwrap();
        assert!(ctx.response_headers().is_empty());
    }

    #[test]
    fn rejects_invalid_header_name() {
        assert!(matches!(
            SetHeader::try_new("bad header", "1"),
            Err(Error::Configuration(_))
        ));
    }
}
