//! Connection multiplexer: one listener, two protocol servers.
//!
//! # Data Flow
//! ```text
//! Listener::accept ──► spawn per connection ──► classify (bounded by timeout)
//!                                                   │
//!                         Binary ◄──────────────────┼──────────────► Textual
//!                           │                       │                   │
//!                   binary queue              Empty: drop         textual queue
//!                           │                                           │
//!                Incoming::Routed (binary)                Incoming::Routed (textual)
//! ```
//!
//! # Design Decisions
//! - One task per connection owns its read position; no two readers ever
//!   touch the same socket
//! - Bytes read while classifying are replayed through `PrefixedStream`
//! - A classification failure closes that connection only; the accept loop
//!   keeps running
//! - A timeout after a complete preface routes binary: gRPC clients send
//!   the preface and SETTINGS, then wait for the server's SETTINGS before
//!   any HEADERS. A timeout before the preface is counted as a failure

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::MuxConfig;
use crate::error::Error;
use crate::net::classify::{classify, Verdict, PREFACE};
use crate::net::listener::{Accepted, ConnectionPermit, Incoming, Listener};
use crate::net::prefixed::PrefixedStream;
use crate::observability::metrics::record_mux;

/// Classified connections waiting for a protocol server.
const QUEUE_DEPTH: usize = 128;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Per-outcome connection counters.
#[derive(Debug, Default)]
pub struct MuxStats {
    binary: AtomicU64,
    textual: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
}

impl MuxStats {
    pub fn binary(&self) -> u64 {
        self.binary.load(Ordering::Relaxed)
    }

    pub fn textual(&self) -> u64 {
        self.textual.load(Ordering::Relaxed)
    }

    /// Connections closed by the peer before sending a byte.
    pub fn empty(&self) -> u64 {
        self.empty.load(Ordering::Relaxed)
    }

    /// Connections closed after a read error or timeout.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record(&self, verdict: Verdict) {
        let counter = match verdict {
            Verdict::Binary => &self.binary,
            Verdict::Textual => &self.textual,
            Verdict::Empty => &self.empty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        record_mux(verdict.as_str());
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        record_mux("failed");
    }
}

#[derive(Clone)]
struct Queues {
    binary: mpsc::Sender<Accepted>,
    textual: mpsc::Sender<Accepted>,
}

/// Accept loop that splits one listener between two servers.
pub struct Multiplexer {
    listener: Listener,
    config: Arc<MuxConfig>,
    queues: Queues,
    stats: Arc<MuxStats>,
}

/// Splits `listener` into `(textual, binary)` connection sources plus the
/// multiplexer that feeds them. The multiplexer does nothing until `run`.
pub fn split(listener: Listener, config: MuxConfig) -> Result<(Multiplexer, Incoming, Incoming), Error> {
    let local_addr = listener.local_addr()?;
    let (binary_tx, binary_rx) = mpsc::channel(QUEUE_DEPTH);
    let (textual_tx, textual_rx) = mpsc::channel(QUEUE_DEPTH);

    let mux = Multiplexer {
        listener,
        config: Arc::new(config),
        queues: Queues {
            binary: binary_tx,
            textual: textual_tx,
        },
        stats: Arc::new(MuxStats::default()),
    };
    let textual = Incoming::Routed {
        queue: textual_rx,
        local_addr,
    };
    let binary = Incoming::Routed {
        queue: binary_rx,
        local_addr,
    };
    Ok((mux, textual, binary))
}

impl Multiplexer {
    pub fn stats(&self) -> Arc<MuxStats> {
        Arc::clone(&self.stats)
    }

    /// Accepts and classifies until `shutdown` fires. Returning closes both
    /// queues and releases the listener.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        let local_addr = self.listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            match_mode = ?self.config.match_mode,
            "Multiplexer started"
        );

        let mut classifying = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        classifying.spawn(route(
                            stream,
                            peer,
                            permit,
                            Arc::clone(&self.config),
                            self.queues.clone(),
                            Arc::clone(&self.stats),
                        ));
                    }
                    Err(Error::Task(message)) => return Err(Error::Task(message)),
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = classifying.join_next(), if !classifying.is_empty() => {}
            }
        }

        classifying.abort_all();
        tracing::info!(
            binary = self.stats.binary(),
            textual = self.stats.textual(),
            empty = self.stats.empty(),
            failed = self.stats.failed(),
            "Multiplexer stopped"
        );
        Ok(())
    }
}

async fn route(
    mut stream: TcpStream,
    peer: SocketAddr,
    permit: ConnectionPermit,
    config: Arc<MuxConfig>,
    queues: Queues,
    stats: Arc<MuxStats>,
) {
    let mut buf = BytesMut::with_capacity(1024);
    let classified = tokio::time::timeout(
        config.classify_timeout(),
        classify(&mut stream, &mut buf, &config),
    )
    .await;

    let verdict = match classified {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(source)) => {
            let err = Error::Classification { peer, source };
            tracing::warn!(error = %err, "Dropping connection");
            stats.record_failure();
            return;
        }
        Err(_) if buf.starts_with(PREFACE) => {
            tracing::debug!(
                peer_addr = %peer,
                buffered = buf.len(),
                "No header block before timeout; routing as binary"
            );
            Verdict::Binary
        }
        Err(_) => {
            tracing::debug!(
                peer_addr = %peer,
                buffered = buf.len(),
                "Classification timed out"
            );
            stats.record_failure();
            return;
        }
    };

    stats.record(verdict);
    let queue = match verdict {
        Verdict::Binary => &queues.binary,
        Verdict::Textual => &queues.textual,
        Verdict::Empty => {
            tracing::trace!(peer_addr = %peer, "Peer closed before sending data");
            return;
        }
    };

    tracing::debug!(peer_addr = %peer, route = verdict.as_str(), "Connection classified");
    let accepted = Accepted {
        stream: PrefixedStream::new(buf.freeze(), stream),
        peer,
        permit,
    };
    if queue.send(accepted).await.is_err() {
        tracing::debug!(peer_addr = %peer, "Server stopped accepting; closing connection");
    }
}
