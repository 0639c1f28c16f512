//! Binary protocol server.
//!
//! # Responsibilities
//! - Dispatch `POST /package.Service/Method` to the registered handler
//! - Select the codec from the `application/grpc+<token>` subtype
//! - Run unary calls through the middleware chain
//! - Write replies as one framed message followed by status trailers
//!
//! # Design Decisions
//! - Failures are sent trailers-only: HTTP 200 with `grpc-status` in the
//!   response headers and no body
//! - Headers collected on the call context become response headers, written
//!   once after the chain returns
//! - Server-streaming calls bypass the chain; each message is framed as it
//!   is produced and the final status goes in trailers

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use http_body_util::StreamBody;
use hyper::body::Frame;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::call::{CallContext, PathParams};
use crate::codec::{Codec, Registry};
use crate::config::AppConfig;
use crate::error::{CodecError, Error};
use crate::handler::{ErasedStreaming, ErasedUnary, MessageStream};
use crate::middleware::{Chain, Rejected};
use crate::rpc::frame;
use crate::status::{Code, Status};

/// Content type of the binary protocol, without subtype.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Handler registered for one fully-qualified method.
#[derive(Clone)]
pub enum MethodHandler {
    Unary(Arc<dyn ErasedUnary>),
    ServerStreaming(Arc<dyn ErasedStreaming>),
}

/// `/package.Service/Method` → handler.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodHandler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `/{service}/{method}`.
    pub fn insert(&mut self, service: &str, method: &str, handler: MethodHandler) -> Result<(), Error> {
        validate_name("service", service)?;
        validate_name("method", method)?;
        let full = format!("/{service}/{method}");
        if self.methods.contains_key(&full) {
            return Err(Error::configuration(format!("binary method {full} registered twice")));
        }
        self.methods.insert(full, handler);
        Ok(())
    }

    pub fn get(&self, full_method: &str) -> Option<&MethodHandler> {
        self.methods.get(full_method)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn validate_name(what: &str, name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(Error::configuration(format!("invalid {what} name `{name}`")));
    }
    Ok(())
}

/// Everything the binary server needs from the application.
pub struct GrpcSettings {
    pub methods: Arc<MethodTable>,
    pub chain: Chain,
    pub registry: Arc<Registry>,
    pub config: Arc<AppConfig>,
    /// Parent of every call's cancellation token.
    pub calls: CancellationToken,
}

#[derive(Clone)]
struct GrpcState {
    methods: Arc<MethodTable>,
    chain: Chain,
    registry: Arc<Registry>,
    binary_default: String,
    max_body_bytes: usize,
    calls: CancellationToken,
}

/// Binary protocol server.
pub struct GrpcServer {
    router: Router,
}

impl GrpcServer {
    pub fn new(settings: GrpcSettings) -> Self {
        let state = GrpcState {
            methods: settings.methods,
            chain: settings.chain,
            registry: settings.registry,
            binary_default: settings.config.codecs.binary_default.clone(),
            max_body_bytes: settings.config.binding.max_body_bytes,
            calls: settings.calls,
        };
        let router = Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TraceLayer::new_for_http());
        Self { router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Subtype of a binary content type: `None` for plain `application/grpc`,
/// `Some(token)` for `application/grpc+token`. `Err` if not binary at all.
fn subtype(content_type: &str) -> Result<Option<String>, ()> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    let rest = essence
        .get(..GRPC_CONTENT_TYPE.len())
        .filter(|head| head.eq_ignore_ascii_case(GRPC_CONTENT_TYPE))
        .map(|_| &essence[GRPC_CONTENT_TYPE.len()..])
        .ok_or(())?;
    match rest {
        "" => Ok(None),
        _ => match rest.strip_prefix('+') {
            Some(token) if !token.is_empty() => Ok(Some(token.to_ascii_lowercase())),
            _ => Err(()),
        },
    }
}

async fn dispatch(State(state): State<GrpcState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let Some(content_type) = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    };
    let Ok(token) = subtype(&content_type) else {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    };

    let token = token.unwrap_or_else(|| state.binary_default.clone());
    let Some(codec) = state.registry.resolve(&token) else {
        let err = Error::from(CodecError::Unregistered { token });
        return trailers_only(&content_type, HeaderMap::new(), &err.to_status());
    };

    let full_method = parts.uri.path().to_string();
    let Some(handler) = state.methods.get(&full_method).cloned() else {
        tracing::debug!(method = %full_method, "Unknown binary method");
        let status = Status::unimplemented(format!("unknown method {full_method}"));
        return trailers_only(&content_type, HeaderMap::new(), &status);
    };

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let mut ctx = CallContext::binary(full_method, parts.headers.clone(), state.calls.child_token()).with_peer(peer);

    let data = read_body(body, state.max_body_bytes).await;

    match handler {
        MethodHandler::Unary(handler) => {
            let bound = data.and_then(|data| {
                let message = frame::decode_unary(&data)?;
                handler.bind(
                    &mut |sink| codec.unmarshal(message, sink).map_err(Error::from),
                    PathParams::default(),
                    Vec::new(),
                )
            });

            let result = match bound {
                Ok(bound) => {
                    ctx.set_payload(bound.payload);
                    state.chain.run(&mut ctx, bound.endpoint.as_ref()).await
                }
                Err(err) => state.chain.run(&mut ctx, &Rejected::new(err)).await,
            };

            let flushed = ctx.take_response_headers();
            let encoded = result.and_then(|reply| codec.marshal(reply.message()).map_err(Error::from));
            match encoded {
                Ok(bytes) => unary(&content_type, flushed, &bytes),
                Err(err) => {
                    log_failure(&ctx, &err);
                    trailers_only(&content_type, flushed, &err.to_status())
                }
            }
        }
        MethodHandler::ServerStreaming(handler) => {
            let started = data.and_then(|data| {
                let message = frame::decode_unary(&data)?;
                handler.start(
                    &mut |sink| codec.unmarshal(message, sink).map_err(Error::from),
                    &ctx,
                )
            });
            let responses = match started {
                Ok(started) => started.await.map_err(Error::from),
                Err(err) => Err(err),
            };
            match responses {
                Ok(responses) => streaming(&content_type, codec, responses),
                Err(err) => {
                    log_failure(&ctx, &err);
                    trailers_only(&content_type, HeaderMap::new(), &err.to_status())
                }
            }
        }
    }
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, Error> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| Status::new(Code::ResourceExhausted, format!("failed to read request: {e}")).into())
}

fn log_failure(ctx: &CallContext, err: &Error) {
    let status = err.to_status();
    match status.code() {
        Code::Internal | Code::Unknown | Code::DataLoss => {
            tracing::error!(method = ctx.path(), error = %err, "Binary call failed");
        }
        _ => tracing::debug!(method = ctx.path(), error = %err, "Binary call rejected"),
    }
}

/// Response headers: content type echoed back, then flushed call headers.
fn response_headers(content_type: &str, flushed: HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    let mut current = None;
    for (name, value) in flushed {
        if let Some(name) = name {
            current = Some(name);
        }
        let Some(name) = &current else { continue };
        if name == header::CONTENT_TYPE || name == frame::GRPC_STATUS || name == frame::GRPC_MESSAGE {
            continue;
        }
        headers.append(name.clone(), value);
    }
    headers
}

fn with_headers(headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.headers_mut() = headers;
    response
}

fn trailers_only(content_type: &str, flushed: HeaderMap, status: &Status) -> Response {
    let mut headers = response_headers(content_type, flushed);
    frame::put_status(&mut headers, status.code(), status.message());
    with_headers(headers, Body::empty())
}

fn unary(content_type: &str, flushed: HeaderMap, message: &[u8]) -> Response {
    let frames = [
        Frame::data(frame::encode(message)),
        Frame::trailers(frame::ok_headers()),
    ];
    let body = StreamBody::new(stream::iter(frames.into_iter().map(Ok::<_, Infallible>)));
    with_headers(response_headers(content_type, flushed), Body::new(body))
}

fn streaming(content_type: &str, codec: Arc<dyn Codec>, responses: MessageStream) -> Response {
    let frames = stream::unfold(Some(responses), move |state| {
        let codec = Arc::clone(&codec);
        async move {
            let mut responses = state?;
            let trailers = match responses.next().await {
                Some(Ok(message)) => match codec.marshal(message.as_ref()) {
                    Ok(bytes) => return Some((Ok::<_, Infallible>(Frame::data(frame::encode(&bytes))), Some(responses))),
                    Err(err) => frame::status_headers(&Error::from(err).to_status()),
                },
                Some(Err(status)) => frame::status_headers(&status),
                None => frame::ok_headers(),
            };
            Some((Ok(Frame::trailers(trailers)), None))
        }
    });
    with_headers(
        response_headers(content_type, HeaderMap::new()),
        Body::new(StreamBody::new(frames)),
    )
}
