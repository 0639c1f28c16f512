//! twinport demo server.
//!
//! Serves a greeter over both protocols from one port:
//!
//! ```text
//!     grpc  /greeter.Greeter/SayHello        unary
//!     grpc  /greeter.Greeter/SayHelloStream  server streaming
//!     http  GET  /greet/{name}
//!     http  POST /greet
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use twinport::config::{load_config, AppConfig};
use twinport::lifecycle::shutdown_signal;
use twinport::middleware::{Logging, Metrics, Recover, RequestId};
use twinport::observability;
use twinport::{Application, Request, Response, ServiceDescriptor, Status};

#[derive(Debug, Parser)]
#[command(name = "twinport", version, about = "Serve gRPC and HTTP from one port")]
struct Args {
    /// TOML configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shared listener address, overriding `listener.address`.
    #[arg(short, long)]
    address: Option<String>,

    /// Log level, overriding `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct HelloRequest {
    name: String,
    #[serde(default)]
    count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct HelloReply {
    message: String,
}

async fn say_hello(request: Request<HelloRequest>) -> Result<Response<HelloReply>, Status> {
    let name = request.into_message().name;
    if name.is_empty() {
        return Err(Status::invalid_argument("name must not be empty"));
    }
    Ok(Response::new(HelloReply {
        message: format!("hi {name}"),
    }))
}

async fn say_hello_stream(
    request: Request<HelloRequest>,
) -> Result<impl Stream<Item = Result<HelloReply, Status>>, Status> {
    let HelloRequest { name, count } = request.into_message();
    let count = count.unwrap_or(3).min(100);
    Ok(stream::iter((1..=count).map(move |n| {
        Ok(HelloReply {
            message: format!("hi {name} #{n}"),
        })
    })))
}

fn greeter() -> ServiceDescriptor {
    ServiceDescriptor::new("greeter.Greeter")
        .unary("SayHello", say_hello)
        .server_streaming("SayHelloStream", say_hello_stream)
        .route(axum::http::Method::GET, "/greet/{name}", say_hello)
        .route(axum::http::Method::POST, "/greet", say_hello)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(address) = args.address {
        config.listener.address = Some(address);
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    observability::logging::init(&config.observability)?;

    tracing::info!(
        config = ?args.config,
        address = ?config.listener.address,
        max_connections = config.listener.max_connections,
        grace = ?config.shutdown.grace(),
        "Configuration loaded"
    );

    if let Some(address) = &config.observability.metrics_address {
        match address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr)?,
            Err(err) => tracing::error!(metrics_address = %address, error = %err, "Failed to parse metrics address"),
        }
    }

    let app = Application::builder(config)
        .middleware(Arc::new(Recover))
        .middleware(Arc::new(RequestId))
        .middleware(Arc::new(Logging::new()))
        .middleware(Arc::new(Metrics))
        .service(greeter())
        .build()
        .await?;

    app.run_until(shutdown_signal()).await?;
    Ok(())
}
