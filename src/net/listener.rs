//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to configured address(es) or adopt a pre-bound listener
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Present direct and multiplexed listeners through one accept API
//!
//! # Design Decisions
//! - The permit travels with the connection, so a connection routed through
//!   the multiplexer still counts against the limit until it closes
//! - Accept errors are logged and retried; they never end the accept loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::error::Error;
use crate::net::prefixed::PrefixedStream;

/// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to `addr` with connection limits.
    pub async fn bind(addr: SocketAddr, max_connections: usize) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::configuration(format!("failed to bind {addr}: {e}")))?;
        Self::from_tcp(listener, max_connections)
    }

    /// Adopt an already-bound listener.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Result<Self, Error> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            max_connections,
            "Listener bound"
        );
        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Waits while the limit is reached. The returned permit must be held
    /// for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), Error> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| Error::Task("connection limit closed".to_string()))?;

        let (stream, addr) = self.inner.accept().await?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.inner.local_addr()?)
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool, even if
/// the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// A connection ready for a protocol server.
#[derive(Debug)]
pub struct Accepted {
    pub stream: PrefixedStream<TcpStream>,
    pub peer: SocketAddr,
    pub permit: ConnectionPermit,
}

/// Source of connections for one protocol server.
pub enum Incoming {
    /// Accepts straight from a socket the server owns.
    Direct(Listener),
    /// Receives connections the multiplexer classified for this server.
    Routed {
        queue: mpsc::Receiver<Accepted>,
        local_addr: SocketAddr,
    },
}

impl Incoming {
    /// Next connection. `None` once a routed queue is closed.
    pub async fn accept(&mut self) -> Option<Accepted> {
        match self {
            Incoming::Direct(listener) => loop {
                match listener.accept().await {
                    Ok((stream, peer, permit)) => {
                        return Some(Accepted {
                            stream: PrefixedStream::plain(stream),
                            peer,
                            permit,
                        })
                    }
                    Err(Error::Task(_)) => return None,
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            },
            Incoming::Routed { queue, .. } => queue.recv().await,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        match self {
            Incoming::Direct(listener) => listener.local_addr(),
            Incoming::Routed { local_addr, .. } => Ok(*local_addr),
        }
    }
}
