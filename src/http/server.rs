//! Textual protocol server setup.
//!
//! # Responsibilities
//! - Create the Axum Router: health endpoint plus one fallback dispatcher
//! - Wire up tower layers (tracing, request timeout)
//! - Per request: route lookup, binding, middleware chain, response write
//!
//! # Design Decisions
//! - Routing is done by the crate's own route table so conflicts surface as
//!   registration errors; Axum only sees a single catch-all
//! - The response codec is negotiated before the chain runs, so an
//!   unacceptable `Accept` never reaches a handler
//! - Outgoing headers are taken from the call context once, after the chain

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request},
    response::Response,
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::call::{CallContext, Reply};
use crate::codec::Registry;
use crate::config::AppConfig;
use crate::error::Error;
use crate::http::binder::Binder;
use crate::http::response;
use crate::middleware::{Chain, Endpoint, Rejected};
use crate::routing::{Lookup, RouteTable};

/// Path of the built-in health endpoint.
pub const HEALTHZ_PATH: &str = "/debug/healthz";

/// Everything the textual server needs from the application.
pub struct HttpSettings {
    pub routes: Arc<RouteTable>,
    pub chain: Chain,
    pub registry: Arc<Registry>,
    pub config: Arc<AppConfig>,
    /// Parent of every call's cancellation token.
    pub calls: CancellationToken,
}

/// Application state injected into the dispatcher.
#[derive(Clone)]
struct HttpState {
    routes: Arc<RouteTable>,
    chain: Chain,
    registry: Arc<Registry>,
    default_codec: String,
    binder: Binder,
    calls: CancellationToken,
}

/// Textual protocol server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(settings: HttpSettings) -> Self {
        let config = &settings.config;
        let state = HttpState {
            routes: settings.routes,
            chain: settings.chain,
            registry: Arc::clone(&settings.registry),
            default_codec: config.codecs.default.clone(),
            binder: Binder::new(
                settings.registry,
                config.codecs.clone(),
                config.binding.clone(),
            ),
            calls: settings.calls,
        };
        let router = Self::build_router(config, state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: HttpState) -> Router {
        let mut router = Router::new();
        if config.http.healthz {
            router = router.route(HEALTHZ_PATH, get(healthz));
        }
        router
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(config.http.request_timeout()))
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

async fn healthz() -> &'static str {
    "OK"
}

/// Runs a route's own middleware around the bound handler.
struct Routed<'a> {
    middleware: &'a Chain,
    endpoint: &'a dyn Endpoint,
}

#[async_trait::async_trait]
impl Endpoint for Routed<'_> {
    async fn call(&self, ctx: &mut CallContext) -> Result<Reply, Error> {
        self.middleware.run(ctx, self.endpoint).await
    }
}

/// Main dispatcher: NEW → BOUND → HANDLED → WRITTEN.
async fn dispatch(State(state): State<HttpState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let accept = parts.headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    let codec = match state.registry.negotiate(accept, &state.default_codec) {
        Ok(codec) => codec,
        Err(err) => match state.registry.resolve(&state.default_codec) {
            Some(fallback) => return response::error(&Error::from(err), fallback.as_ref(), Default::default()),
            None => return response::error(&Error::from(err), &crate::codec::JsonCodec, Default::default()),
        },
    };

    let path = parts.uri.path().to_string();
    let (route, params) = match state.routes.lookup(&parts.method, &path) {
        Lookup::Found { route, params } => (route, Ok(params)),
        Lookup::Undecodable { route, error } => (route, Err(error)),
        Lookup::MethodNotAllowed { allow } => return response::method_not_allowed(&allow, codec.as_ref()),
        Lookup::NotFound => return response::not_found(&path, codec.as_ref()),
    };

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let mut ctx = CallContext::textual(
        parts.method.as_str(),
        path,
        parts.headers.clone(),
        state.calls.child_token(),
    )
    .with_peer(peer);

    let bound = match params {
        Ok(params) => match state.binder.prepare(&parts, body, &params).await {
            Ok(prepared) => route.handler.bind(
                &mut |sink| prepared.input.deserialize(sink),
                params,
                prepared.files,
            ),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    let result = match bound {
        Ok(bound) => {
            ctx.set_payload(bound.payload);
            let endpoint = Routed {
                middleware: &route.middleware,
                endpoint: bound.endpoint.as_ref(),
            };
            state.chain.run(&mut ctx, &endpoint).await
        }
        Err(err) => state.chain.run(&mut ctx, &Rejected::new(err)).await,
    };

    let flushed = ctx.take_response_headers();
    match result {
        Ok(reply) => response::reply(&reply, codec.as_ref(), flushed),
        Err(err) => response::error(&err, codec.as_ref(), flushed),
    }
}
