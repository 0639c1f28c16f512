//! Typed handlers and their type-erased form.
//!
//! # Data Flow
//! ```text
//! async fn(Request<Req>) -> Result<Response<Resp>, Status>
//!     → UnaryHandler::new()          (registration time, typed)
//!     → Arc<dyn ErasedUnary>         (stored in route table / method table)
//!     → bind(source)                 (per call: decode Req, set payload)
//!     → BoundCall as chain Endpoint  (per call: invoke, merge headers)
//! ```
//!
//! # Design Decisions
//! - The handler variant is fixed when it is registered; no runtime casts
//! - Decoding happens before the chain so middleware can read the payload
//! - Server-streaming handlers are a separate variant and never run inside
//!   the middleware chain

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::call::{CallContext, FilePart, Message, PathParams, Reply, Request, Response};
use crate::codec::Sink;
use crate::error::Error;
use crate::middleware::Endpoint;
use crate::status::Status;

/// An async function from a typed request to a typed response.
///
/// Implemented for every `Fn(Request<Req>) -> impl Future<Output = Result<Response<Resp>, Status>>`.
pub trait Handler<Req, Resp>: Clone + Send + Sync + 'static {
    fn call(&self, request: Request<Req>) -> BoxFuture<'static, Result<Response<Resp>, Status>>;
}

impl<F, Fut, Req, Resp> Handler<Req, Resp> for F
where
    F: Fn(Request<Req>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Resp>, Status>> + Send + 'static,
{
    fn call(&self, request: Request<Req>) -> BoxFuture<'static, Result<Response<Resp>, Status>> {
        Box::pin(self(request))
    }
}

/// Produces a request by driving a [`Sink`] with some deserializer.
pub type Source<'a> = &'a mut dyn for<'s> FnMut(Sink<'s>) -> Result<(), Error>;

/// A request decoded for one call, ready to run as the chain's endpoint.
pub struct Bound {
    pub payload: Arc<dyn Message>,
    pub endpoint: Box<dyn Endpoint>,
}

/// Object-safe unary handler.
pub trait ErasedUnary: Send + Sync + 'static {
    fn bind(&self, source: Source<'_>, params: PathParams, files: Vec<FilePart>) -> Result<Bound, Error>;
}

/// Adapts a typed [`Handler`] to [`ErasedUnary`].
pub struct UnaryHandler<H, Req, Resp> {
    handler: H,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<H, Req, Resp> UnaryHandler<H, Req, Resp>
where
    H: Handler<Req, Resp>,
    Req: DeserializeOwned + Message + Clone,
    Resp: Message,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _types: PhantomData,
        }
    }

    pub fn erased(handler: H) -> Arc<dyn ErasedUnary> {
        Arc::new(Self::new(handler))
    }
}

impl<H, Req, Resp> ErasedUnary for UnaryHandler<H, Req, Resp>
where
    H: Handler<Req, Resp>,
    Req: DeserializeOwned + Message + Clone,
    Resp: Message,
{
    fn bind(&self, source: Source<'_>, params: PathParams, files: Vec<FilePart>) -> Result<Bound, Error> {
        let message = Arc::new(decode_with::<Req>(source)?);
        Ok(Bound {
            payload: message.clone(),
            endpoint: Box::new(BoundCall {
                handler: self.handler.clone(),
                message,
                params,
                files,
                _types: PhantomData,
            }),
        })
    }
}

/// Decodes a `T` from `source`.
pub(crate) fn decode_with<T: DeserializeOwned>(source: Source<'_>) -> Result<T, Error> {
    let mut decoded = None;
    source(&mut |de| {
        decoded = Some(erased_serde::deserialize::<T>(de)?);
        Ok(())
    })?;
    decoded.ok_or_else(|| Error::binding("request body produced no value"))
}

struct BoundCall<H, Req, Resp> {
    handler: H,
    message: Arc<Req>,
    params: PathParams,
    files: Vec<FilePart>,
    _types: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<H, Req, Resp> Endpoint for BoundCall<H, Req, Resp>
where
    H: Handler<Req, Resp>,
    Req: Message + Clone,
    Resp: Message,
{
    async fn call(&self, ctx: &mut CallContext) -> Result<Reply, Error> {
        let request = Request::from_context(
            ctx,
            self.params.clone(),
            self.files.clone(),
            Req::clone(&self.message),
        );
        let (headers, status, message) = self.handler.call(request).await?.into_parts();

        let mut current = None;
        for (name, value) in headers {
            if let Some(name) = name {
                current = Some(name);
            }
            if let Some(name) = &current {
                ctx.response_headers_mut().append(name.clone(), value);
            }
        }

        let reply = Reply::new(message);
        Ok(match status {
            Some(status) => reply.with_status(status),
            None => reply,
        })
    }
}

/// An async function producing a stream of typed responses.
///
/// Implemented for every `Fn(Request<Req>) -> impl Future<Output = Result<impl Stream<Item = Result<Resp, Status>>, Status>>`.
pub trait StreamingHandler<Req, Resp>: Clone + Send + Sync + 'static {
    fn call(&self, request: Request<Req>) -> BoxFuture<'static, Result<BoxStream<'static, Result<Resp, Status>>, Status>>;
}

impl<F, Fut, S, Req, Resp> StreamingHandler<Req, Resp> for F
where
    F: Fn(Request<Req>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<S, Status>> + Send + 'static,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
{
    fn call(&self, request: Request<Req>) -> BoxFuture<'static, Result<BoxStream<'static, Result<Resp, Status>>, Status>> {
        let started = self(request);
        Box::pin(async move { started.await.map(StreamExt::boxed) })
    }
}

/// Responses of a server-streaming call, erased.
pub type MessageStream = BoxStream<'static, Result<Box<dyn Message>, Status>>;

/// Object-safe server-streaming handler.
pub trait ErasedStreaming: Send + Sync + 'static {
    /// Decodes the request and starts the handler. The outer error covers
    /// decoding; the inner one is the handler refusing the call.
    fn start(
        &self,
        source: Source<'_>,
        ctx: &CallContext,
    ) -> Result<BoxFuture<'static, Result<MessageStream, Status>>, Error>;
}

/// Adapts a typed [`StreamingHandler`] to [`ErasedStreaming`].
pub struct ServerStreamingHandler<H, Req, Resp> {
    handler: H,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<H, Req, Resp> ServerStreamingHandler<H, Req, Resp>
where
    H: StreamingHandler<Req, Resp>,
    Req: DeserializeOwned + Send + 'static,
    Resp: Message,
{
    pub fn erased(handler: H) -> Arc<dyn ErasedStreaming> {
        Arc::new(Self {
            handler,
            _types: PhantomData,
        })
    }
}

impl<H, Req, Resp> ErasedStreaming for ServerStreamingHandler<H, Req, Resp>
where
    H: StreamingHandler<Req, Resp>,
    Req: DeserializeOwned + Send + 'static,
    Resp: Message,
{
    fn start(
        &self,
        source: Source<'_>,
        ctx: &CallContext,
    ) -> Result<BoxFuture<'static, Result<MessageStream, Status>>, Error> {
        let message = decode_with::<Req>(source)?;
        let request = Request::from_context(ctx, PathParams::default(), Vec::new(), message);
        let started = self.handler.call(request);
        Ok(Box::pin(async move {
            let responses = started.await?;
            Ok(responses
                .map(|item| item.map(|resp| Box::new(resp) as Box<dyn Message>))
                .boxed())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, JsonCodec};
    use crate::error::CodecError;
    use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct GreetRequest {
        name: String,
    }

    #[derive(Debug, Serialize)]
    struct Greeting {
        message: String,
    }

    async fn greet(request: Request<GreetRequest>) -> Result<Response<Greeting>, Status> {
        let message = format!("hi {}", request.message().name);
        Ok(Response::new(Greeting { message })
            .with_header(HeaderName::from_static("x-handler"), HeaderValue::from_static("1"))
            .with_status(StatusCode::CREATED))
    }

    fn json_source(body: &'static [u8]) -> impl FnMut(Sink<'_>) -> Result<(), Error> {
        move |sink| JsonCodec.unmarshal(body, sink).map_err(Error::from)
    }

    #[tokio::test]
    async fn bound_call_runs_handler_and_merges_headers() {
        let handler = UnaryHandler::erased(greet);
        let mut source = json_source(br#"{"name":"Ada"}"#);
        let bound = handler
            .bind(&mut source, PathParams::default(), Vec::new())
            .unwrap();
        assert!(format!("{:?}", bound.payload).contains("Ada"));

        let mut ctx = CallContext::textual("POST", "/greet", HeaderMap::new(), CancellationToken::new());
        let reply = bound.endpoint.call(&mut ctx).await.unwrap();

        assert_eq!(reply.status(), Some(StatusCode::CREATED));
        assert_eq!(
            serde_json::to_string(reply.message()).unwrap(),
            r#"{"message":"hi Ada"}"#
        );
        assert_eq!(ctx.response_headers().get("x-handler").unwrap(), "1");
    }

    async fn countdown(
        request: Request<GreetRequest>,
    ) -> Result<impl Stream<Item = Result<Greeting, Status>>, Status> {
        let name = request.into_message().name;
        if name.is_empty() {
            return Err(Status::invalid_argument("name is required"));
        }
        Ok(futures_util::stream::iter((1..=3).rev().map(move |n| {
            Ok(Greeting {
                message: format!("{n} {name}"),
            })
        })))
    }

    #[tokio::test]
    async fn streaming_handler_yields_erased_messages() {
        let handler = ServerStreamingHandler::erased(countdown);
        let ctx = CallContext::binary("/greeter.Greeter/Countdown", HeaderMap::new(), CancellationToken::new());
        let mut source = json_source(br#"{"name":"Ada"}"#);

        let started = handler.start(&mut source, &ctx).unwrap();
        let messages: Vec<_> = started.await.unwrap().collect().await;

        assert_eq!(messages.len(), 3);
        let first = messages[0].as_ref().unwrap();
        assert_eq!(serde_json::to_string(first.as_ref()).unwrap(), r#"{"message":"3 Ada"}"#);
    }

    #[tokio::test]
    async fn streaming_handler_can_refuse_before_first_message() {
        let handler = ServerStreamingHandler::erased(countdown);
        let ctx = CallContext::binary("/greeter.Greeter/Countdown", HeaderMap::new(), CancellationToken::new());
        let mut source = json_source(br#"{"name":""}"#);

        let status = handler.start(&mut source, &ctx).unwrap().await.err().unwrap();
        assert_eq!(status, Status::invalid_argument("name is required"));
    }

    #[test]
    fn decode_failure_is_a_codec_error() {
        let handler = UnaryHandler::erased(greet);
        let mut source = json_source(br#"{"nom":"Ada"}"#);
        let err = handler
            .bind(&mut source, PathParams::default(), Vec::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Codec(CodecError::Decode { .. })));
    }
}
