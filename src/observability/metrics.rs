//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define call and multiplexer metrics
//! - Install the Prometheus exporter when an address is configured
//!
//! # Metrics
//! - `twinport_calls_total` (counter): calls by kind and outcome code
//! - `twinport_call_duration_seconds` (histogram): call latency by kind
//! - `twinport_mux_connections_total` (counter): classified connections by route
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Only the binary installs an exporter; the library never does

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::call::Kind;
use crate::error::Error;
use crate::status::Code;

pub const CALLS_TOTAL: &str = "twinport_calls_total";
pub const CALL_DURATION_SECONDS: &str = "twinport_call_duration_seconds";
pub const MUX_CONNECTIONS_TOTAL: &str = "twinport_mux_connections_total";

/// Installs the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Error> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::configuration(format!("failed to install metrics exporter: {e}")))?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Records one finished call.
pub fn record_call(kind: Kind, code: Code, duration: Duration) {
    metrics::counter!(CALLS_TOTAL, "kind" => kind.as_str(), "code" => code.as_str()).increment(1);
    metrics::histogram!(CALL_DURATION_SECONDS, "kind" => kind.as_str()).record(duration.as_secs_f64());
}

/// Records one multiplexer decision (`binary`, `textual`, `empty`, `failed`).
pub fn record_mux(route: &'static str) {
    metrics::counter!(MUX_CONNECTIONS_TOTAL, "route" => route).increment(1);
}
