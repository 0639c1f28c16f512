//! Per-call state shared by both protocol adapters.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{Extensions, HeaderMap};
use tokio_util::sync::CancellationToken;

use crate::call::message::Message;

/// Which protocol produced a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// HTTP/2-framed binary RPC.
    Binary,
    /// Verb + path + headers + body.
    Textual,
}

impl Kind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Binary => "binary",
            Kind::Textual => "textual",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-agnostic view of one inbound call.
///
/// Created by a protocol adapter, handed by `&mut` through the middleware
/// chain, discarded once the response is written. Outgoing headers collect
/// here and are flushed to the transport once, after the chain returns.
pub struct CallContext {
    kind: Kind,
    method: String,
    path: String,
    peer: Option<SocketAddr>,
    request_headers: HeaderMap,
    response_headers: HeaderMap,
    payload: Option<Arc<dyn Message>>,
    extensions: Extensions,
    cancel: CancellationToken,
    started: Instant,
}

impl CallContext {
    /// Context for a textual call (`GET /users/7`).
    pub fn textual(
        method: impl Into<String>,
        path: impl Into<String>,
        request_headers: HeaderMap,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(Kind::Textual, method.into(), path.into(), request_headers, cancel)
    }

    /// Context for a binary call. `full_method` is `/package.Service/Method`;
    /// the binary protocol has no verb, so `method` stays empty.
    pub fn binary(
        full_method: impl Into<String>,
        request_headers: HeaderMap,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(Kind::Binary, String::new(), full_method.into(), request_headers, cancel)
    }

    fn new(
        kind: Kind,
        method: String,
        path: String,
        request_headers: HeaderMap,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            method,
            path,
            peer: None,
            request_headers,
            response_headers: HeaderMap::new(),
            payload: None,
            extensions: Extensions::new(),
            cancel,
            started: Instant::now(),
        }
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Verb of a textual call; empty for binary calls.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, or the fully-qualified method name for binary calls.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Removes the accumulated outgoing headers. Adapters call this once,
    /// after the chain has returned; later calls see an empty map.
    pub fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }

    /// Decoded request, once the adapter or binder has produced it.
    pub fn payload(&self) -> Option<&dyn Message> {
        self.payload.as_deref()
    }

    pub fn set_payload(&mut self, payload: Arc<dyn Message>) {
        self.payload = Some(payload);
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Token cancelled when the server gives up waiting for this call.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("peer", &self.peer)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
