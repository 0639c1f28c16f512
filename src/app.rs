//! Application lifecycle coordinator.
//!
//! # Data Flow
//! ```text
//! ApplicationBuilder
//!     → validate config, install services (routes + methods)
//!     → plan listeners (shared + multiplexer, or dedicated)
//!     → Application::run
//!         ├─ task: multiplexer accept loop (shared listener only)
//!         ├─ task: textual serve loop
//!         └─ task: binary serve loop
//!     → first failure or shutdown trigger ─► drain all ─► first error returned
//! ```
//!
//! # Design Decisions
//! - Everything is built before `run`; the route table, method table and
//!   codec registry are read-only once serving starts
//! - One middleware chain is shared by both protocols
//! - One drain token stops every task; one force token cancels every call

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::codec::Registry;
use crate::config::{validate_config, AppConfig, ConfigError};
use crate::error::Error;
use crate::http::{HttpServer, HttpSettings};
use crate::lifecycle::{plan_listeners, ListenerPlan, Prebound, Shutdown};
use crate::middleware::{Chain, Middleware};
use crate::net::{self, Drain, Incoming, MuxStats, Multiplexer, Protocol};
use crate::routing::RouteTable;
use crate::rpc::{GrpcServer, GrpcSettings, MethodTable};
use crate::service::ServiceDescriptor;

/// Collects configuration, middleware, services and listeners.
pub struct ApplicationBuilder {
    config: AppConfig,
    registry: Option<Arc<Registry>>,
    middleware: Vec<Arc<dyn Middleware>>,
    services: Vec<ServiceDescriptor>,
    routes: RouteTable,
    prebound: Prebound,
}

impl ApplicationBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: None,
            middleware: Vec::new(),
            services: Vec::new(),
            routes: RouteTable::new(),
            prebound: Prebound::default(),
        }
    }

    /// Codec registry to use instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Appends a middleware to the chain shared by both protocols.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    /// Textual routes registered outside any service. Service routes are
    /// added to this table at build time.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Pre-bound listener shared by both protocols.
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.prebound.shared = Some(listener);
        self
    }

    /// Pre-bound listener for the textual protocol only.
    pub fn http_listener(mut self, listener: TcpListener) -> Self {
        self.prebound.http = Some(listener);
        self
    }

    /// Pre-bound listener for the binary protocol only.
    pub fn grpc_listener(mut self, listener: TcpListener) -> Self {
        self.prebound.grpc = Some(listener);
        self
    }

    /// Validates, registers and binds. Any failure here is a
    /// configuration error.
    pub async fn build(self) -> Result<Application, Error> {
        let registry = self.registry.unwrap_or_else(Registry::global);
        validate_config(&self.config, &registry).map_err(ConfigError::Validation)?;

        let mut routes = self.routes;
        let mut methods = MethodTable::new();
        for service in self.services {
            tracing::debug!(service = service.name(), "Installing service");
            service.install(&mut methods, &mut routes)?;
        }

        let config = Arc::new(self.config);
        let chain = Chain::new(self.middleware);
        let calls = CancellationToken::new();

        let (mux, textual, binary) = match plan_listeners(&config, self.prebound).await? {
            ListenerPlan::Multiplexed(listener) => {
                let (mux, textual, binary) = net::split(listener, config.mux.clone())?;
                (
                    Some(mux),
                    config.http.enabled.then_some(textual),
                    config.grpc.enabled.then_some(binary),
                )
            }
            ListenerPlan::Dedicated { http, grpc } => {
                (None, http.map(Incoming::Direct), grpc.map(Incoming::Direct))
            }
        };

        let http = match &textual {
            Some(_) => Some(HttpServer::new(HttpSettings {
                routes: Arc::new(routes),
                chain: chain.clone(),
                registry: Arc::clone(&registry),
                config: Arc::clone(&config),
                calls: calls.clone(),
            })),
            None => None,
        };
        let grpc = match &binary {
            Some(_) => Some(GrpcServer::new(GrpcSettings {
                methods: Arc::new(methods),
                chain,
                registry,
                config: Arc::clone(&config),
                calls: calls.clone(),
            })),
            None => None,
        };

        Ok(Application {
            local_addr: mux.as_ref().and(textual.as_ref()).map(Incoming::local_addr).transpose()?,
            http_addr: textual.as_ref().map(Incoming::local_addr).transpose()?,
            grpc_addr: binary.as_ref().map(Incoming::local_addr).transpose()?,
            mux_stats: mux.as_ref().map(Multiplexer::stats),
            config,
            mux,
            textual: textual.zip(http),
            binary: binary.zip(grpc),
            shutdown: Shutdown::new(),
            calls,
        })
    }
}

/// A built application, ready to run.
pub struct Application {
    config: Arc<AppConfig>,
    mux: Option<Multiplexer>,
    textual: Option<(Incoming, HttpServer)>,
    binary: Option<(Incoming, GrpcServer)>,
    local_addr: Option<SocketAddr>,
    http_addr: Option<SocketAddr>,
    grpc_addr: Option<SocketAddr>,
    mux_stats: Option<Arc<MuxStats>>,
    shutdown: Shutdown,
    calls: CancellationToken,
}

impl Application {
    pub fn builder(config: AppConfig) -> ApplicationBuilder {
        ApplicationBuilder::new(config)
    }

    /// Address of the shared listener, when the multiplexer is in use.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address the textual protocol is served on.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Address the binary protocol is served on.
    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        self.grpc_addr
    }

    /// Multiplexer counters, when the multiplexer is in use.
    pub fn mux_stats(&self) -> Option<Arc<MuxStats>> {
        self.mux_stats.clone()
    }

    /// Handle that starts a graceful shutdown of `run`.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serves until the shutdown handle is triggered.
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `signal` resolves, the shutdown handle is triggered, or
    /// a task fails. Returns the first task error.
    pub async fn run_until(self, signal: impl Future<Output = ()> + Send) -> Result<(), Error> {
        tracing::info!(
            name = %self.config.name,
            version = %self.config.version,
            address = ?self.local_addr,
            http = ?self.http_addr,
            grpc = ?self.grpc_addr,
            "Application starting"
        );

        let drain = Drain {
            begin: self.shutdown.token(),
            force: self.calls.clone(),
            grace: self.config.shutdown.grace(),
        };

        let mut tasks: JoinSet<(&'static str, Result<(), Error>)> = JoinSet::new();
        if let Some(mux) = self.mux {
            let begin = drain.begin.clone();
            tasks.spawn(async move { ("multiplexer", mux.run(begin).await) });
        }
        if let Some((incoming, server)) = self.textual {
            let drain = drain.clone();
            tasks.spawn(async move {
                let result = net::serve(Protocol::Textual, incoming, server.router(), drain).await;
                (Protocol::Textual.as_str(), result)
            });
        }
        if let Some((incoming, server)) = self.binary {
            let drain = drain.clone();
            tasks.spawn(async move {
                let result = net::serve(Protocol::Binary, incoming, server.router(), drain).await;
                (Protocol::Binary.as_str(), result)
            });
        }

        let shutdown = self.shutdown;
        tokio::pin!(signal);
        let mut first_error = None;
        loop {
            tokio::select! {
                _ = &mut signal, if !shutdown.is_triggered() => shutdown.trigger(),
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let (task, result) = match joined {
                        Ok(finished) => finished,
                        Err(err) => ("task", Err(Error::Task(err.to_string()))),
                    };
                    match result {
                        Ok(()) => tracing::debug!(task, "Task finished"),
                        Err(err) => {
                            tracing::error!(task, error = %err, "Task failed");
                            first_error.get_or_insert(err);
                        }
                    }
                    shutdown.trigger();
                }
            }
        }

        tracing::info!("Shutdown complete");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
