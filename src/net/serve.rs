//! Accept loop that hands connections to a protocol server.
//!
//! # Responsibilities
//! - Serve each accepted connection with hyper on its own task
//! - Attach the peer address to every request
//! - Drain on shutdown: stop accepting, let connections finish, then force
//!
//! # Design Decisions
//! - The textual side uses hyper-util's auto builder (HTTP/1.1 and h2c);
//!   the binary side speaks HTTP/2 only
//! - Forcing cancels every in-flight call's token first, then aborts what is
//!   still running after a short settle window

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::Router;
use hyper::body::Incoming as IncomingBody;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::error::Error;
use crate::net::listener::{Accepted, Incoming};

/// Time cancelled calls get to unwind before their connections are aborted.
const FORCE_SETTLE: Duration = Duration::from_millis(250);

/// Which protocol a serve loop speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Textual,
    Binary,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Textual => "textual",
            Protocol::Binary => "binary",
        }
    }
}

/// Shutdown signals for one serve loop.
#[derive(Clone)]
pub struct Drain {
    /// Stop accepting and gracefully close connections.
    pub begin: CancellationToken,
    /// Cancelled when the grace period runs out; parent of all call tokens.
    pub force: CancellationToken,
    pub grace: Duration,
}

/// Serves connections from `incoming` until `drain.begin` fires or the
/// source closes, then drains.
pub async fn serve(protocol: Protocol, mut incoming: Incoming, router: Router, drain: Drain) -> Result<(), Error> {
    let local_addr = incoming.local_addr()?;
    tracing::info!(protocol = protocol.as_str(), address = %local_addr, "Server started");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = drain.begin.cancelled() => break,
            accepted = incoming.accept() => match accepted {
                Some(accepted) => {
                    connections.spawn(serve_connection(protocol, accepted, router.clone(), drain.begin.clone()));
                }
                None => break,
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(incoming);

    tracing::info!(
        protocol = protocol.as_str(),
        connections = connections.len(),
        "Draining connections"
    );
    drain.begin.cancel();

    let drained = tokio::time::timeout(drain.grace, join_all(&mut connections)).await;
    if drained.is_ok() {
        tracing::info!(protocol = protocol.as_str(), "Server stopped");
        return Ok(());
    }

    let err = Error::Shutdown {
        protocol: protocol.as_str(),
        grace: drain.grace,
    };
    tracing::warn!(error = %err, remaining = connections.len(), "Grace period exceeded");
    drain.force.cancel();
    if tokio::time::timeout(FORCE_SETTLE, join_all(&mut connections)).await.is_err() {
        connections.abort_all();
        join_all(&mut connections).await;
    }
    Err(err)
}

async fn join_all(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(protocol: Protocol, accepted: Accepted, router: Router, drain: CancellationToken) {
    let Accepted { stream, peer, permit } = accepted;
    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(router.map_request(move |mut request: Request<IncomingBody>| {
        request.extensions_mut().insert(ConnectInfo::<SocketAddr>(peer));
        request
    }));

    let result = match protocol {
        Protocol::Textual => {
            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(io, service);
            tokio::pin!(conn);
            tokio::select! {
                result = conn.as_mut() => result,
                _ = drain.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            }
        }
        Protocol::Binary => {
            let conn = hyper::server::conn::http2::Builder::new(TokioExecutor::new()).serve_connection(io, service);
            tokio::pin!(conn);
            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = drain.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            result.map_err(Into::into)
        }
    };

    if let Err(err) = result {
        tracing::debug!(protocol = protocol.as_str(), peer_addr = %peer, error = %err, "Connection closed with error");
    }
    drop(permit);
}
