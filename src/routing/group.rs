//! Route groups: shared prefix, shared middleware.

use std::sync::Arc;

use axum::http::Method;
use serde::de::DeserializeOwned;

use crate::call::Message;
use crate::error::Error;
use crate::handler::{Handler, UnaryHandler};
use crate::middleware::Middleware;
use crate::routing::table::{chain_of, join, MethodFilter, RouteTable};

/// Registers routes under a prefix. Nested groups concatenate prefixes and
/// middleware lists, outer group first, route-specific middleware last.
pub struct Group<'a> {
    table: &'a mut RouteTable,
    prefix: String,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl<'a> Group<'a> {
    pub(crate) fn new(table: &'a mut RouteTable, prefix: String, middleware: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            table,
            prefix,
            middleware,
        }
    }

    /// Adds middleware for every route registered through this group afterwards.
    pub fn layer(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group::new(&mut *self.table, join(&self.prefix, prefix), self.middleware.clone())
    }

    pub fn get<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route_with(Method::GET, template, [], handler)
    }

    pub fn post<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route_with(Method::POST, template, [], handler)
    }

    pub fn put<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route_with(Method::PUT, template, [], handler)
    }

    pub fn delete<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route_with(Method::DELETE, template, [], handler)
    }

    pub fn patch<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route_with(Method::PATCH, template, [], handler)
    }

    pub fn any<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.insert(MethodFilter::Any, template, Vec::new(), handler)
    }

    /// Route with its own middleware, run after the group's.
    pub fn route_with<H, Req, Resp>(
        &mut self,
        method: Method,
        template: &str,
        middleware: impl IntoIterator<Item = Arc<dyn Middleware>>,
        handler: H,
    ) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.insert(method.into(), template, middleware.into_iter().collect(), handler)
    }

    fn insert<H, Req, Resp>(
        &mut self,
        method: MethodFilter,
        template: &str,
        extra: Vec<Arc<dyn Middleware>>,
        handler: H,
    ) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        let mut middleware = self.middleware.clone();
        middleware.extend(extra);
        self.table.insert(
            method,
            &join(&self.prefix, template),
            chain_of(&middleware),
            UnaryHandler::erased(handler),
        )?;
        Ok(self)
    }
}
