//! Service registration.
//!
//! A [`ServiceDescriptor`] bundles one binary-protocol service (its method
//! table) with any number of textual routes. The application never looks at
//! payload types; it only installs what the descriptor lists.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::call::Message;
use crate::error::Error;
use crate::handler::{Handler, ServerStreamingHandler, StreamingHandler, UnaryHandler};
use crate::middleware::Middleware;
use crate::routing::table::chain_of;
use crate::routing::{MethodFilter, RouteTable};
use crate::rpc::{MethodHandler, MethodTable};

struct PendingRoute {
    method: MethodFilter,
    template: String,
    middleware: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn crate::handler::ErasedUnary>,
}

/// One service exposed over both protocols.
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<(String, MethodHandler)>,
    routes: Vec<PendingRoute>,
}

impl ServiceDescriptor {
    /// `name` is the fully-qualified service name, e.g. `greeter.Greeter`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a unary binary method, reachable at `/{service}/{method}`.
    pub fn unary<H, Req, Resp>(mut self, method: &str, handler: H) -> Self
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.methods
            .push((method.to_string(), MethodHandler::Unary(UnaryHandler::erased(handler))));
        self
    }

    /// Adds a server-streaming binary method. These calls do not pass
    /// through the middleware chain.
    pub fn server_streaming<H, Req, Resp>(mut self, method: &str, handler: H) -> Self
    where
        H: StreamingHandler<Req, Resp>,
        Req: DeserializeOwned + Send + 'static,
        Resp: Message,
    {
        self.methods.push((
            method.to_string(),
            MethodHandler::ServerStreaming(ServerStreamingHandler::erased(handler)),
        ));
        self
    }

    /// Adds a textual route.
    pub fn route<H, Req, Resp>(self, method: impl Into<MethodFilter>, template: &str, handler: H) -> Self
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route_with(method, template, Vec::new(), handler)
    }

    /// Adds a textual route with its own middleware.
    pub fn route_with<H, Req, Resp>(
        mut self,
        method: impl Into<MethodFilter>,
        template: &str,
        middleware: impl IntoIterator<Item = Arc<dyn Middleware>>,
        handler: H,
    ) -> Self
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.routes.push(PendingRoute {
            method: method.into(),
            template: template.to_string(),
            middleware: middleware.into_iter().collect(),
            handler: UnaryHandler::erased(handler),
        });
        self
    }

    /// Installs every method and route. Fails on the first duplicate or
    /// invalid name.
    pub(crate) fn install(self, methods: &mut MethodTable, routes: &mut RouteTable) -> Result<(), Error> {
        for (method, handler) in self.methods {
            methods.insert(&self.name, &method, handler)?;
        }
        for route in self.routes {
            routes.insert(route.method, &route.template, chain_of(&route.middleware), route.handler)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods.iter().map(|(m, _)| m).collect::<Vec<_>>())
            .field("routes", &self.routes.len())
            .finish()
    }
}
