//! Route table for the textual protocol.
//!
//! # Responsibilities
//! - Map (verb, path template) to a handler and its per-route middleware
//! - Reject duplicate and conflicting templates at registration time
//! - Resolve a request to a route, a 405 (with allowed verbs) or a 404
//!
//! # Design Decisions
//! - Templates use `{name}` segments and a trailing `{*rest}` catch-all
//! - One `matchit` entry per template; verbs hang off that entry
//! - Populated before the server starts, read-only afterwards
//! - Captured segments are percent-decoded; one that is not UTF-8 after
//!   decoding is a binding error for the matched route

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;

use crate::call::{Message, PathParams};
use crate::error::Error;
use crate::handler::{ErasedUnary, Handler, UnaryHandler};
use crate::middleware::{Chain, Middleware};
use crate::routing::group::Group;

/// Verbs a route answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    One(Method),
    Any,
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodFilter::One(method) => f.write_str(method.as_str()),
            MethodFilter::Any => f.write_str("*"),
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        MethodFilter::One(method)
    }
}

/// A registered route.
pub struct RouteEntry {
    pub method: MethodFilter,
    pub template: String,
    pub middleware: Chain,
    pub handler: Arc<dyn ErasedUnary>,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("template", &self.template)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

/// All routes sharing one template.
#[derive(Debug, Default)]
struct TemplateRoutes {
    by_method: Vec<RouteEntry>,
    any: Option<RouteEntry>,
}

/// Outcome of looking up a request.
#[derive(Debug)]
pub enum Lookup<'a> {
    Found {
        route: &'a RouteEntry,
        params: PathParams,
    },
    /// A captured segment does not decode to UTF-8.
    Undecodable {
        route: &'a RouteEntry,
        error: Error,
    },
    /// The path exists but not for this verb.
    MethodNotAllowed { allow: Vec<Method> },
    NotFound,
}

#[derive(Default)]
pub struct RouteTable {
    matcher: matchit::Router<usize>,
    templates: Vec<TemplateRoutes>,
    by_template: HashMap<String, usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route(Method::GET, template, handler)
    }

    pub fn post<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route(Method::POST, template, handler)
    }

    pub fn put<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route(Method::PUT, template, handler)
    }

    pub fn delete<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route(Method::DELETE, template, handler)
    }

    pub fn patch<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route(Method::PATCH, template, handler)
    }

    pub fn head<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route(Method::HEAD, template, handler)
    }

    pub fn options<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.route(Method::OPTIONS, template, handler)
    }

    /// Route answering every verb not claimed by a more specific route.
    pub fn any<H, Req, Resp>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.insert(MethodFilter::Any, template, Chain::default(), UnaryHandler::erased(handler))?;
        Ok(self)
    }

    pub fn route<H, Req, Resp>(&mut self, method: Method, template: &str, handler: H) -> Result<&mut Self, Error>
    where
        H: Handler<Req, Resp>,
        Req: DeserializeOwned + Message + Clone,
        Resp: Message,
    {
        self.insert(method.into(), template, Chain::default(), UnaryHandler::erased(handler))?;
        Ok(self)
    }

    /// Group whose routes share `prefix` and run `middleware` before their own.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group::new(self, prefix.to_string(), Vec::new())
    }

    /// Adds a type-erased route.
    pub fn insert(
        &mut self,
        method: MethodFilter,
        template: &str,
        middleware: Chain,
        handler: Arc<dyn ErasedUnary>,
    ) -> Result<(), Error> {
        if !template.starts_with('/') {
            return Err(Error::configuration(format!(
                "route template `{template}` must start with `/`"
            )));
        }

        let index = match self.by_template.get(template) {
            Some(index) => *index,
            None => {
                let index = self.templates.len();
                self.matcher.insert(template, index).map_err(|e| {
                    Error::configuration(format!("route `{method} {template}` conflicts: {e}"))
                })?;
                self.templates.push(TemplateRoutes::default());
                self.by_template.insert(template.to_string(), index);
                index
            }
        };

        let routes = &mut self.templates[index];
        let duplicate = match &method {
            MethodFilter::Any => routes.any.is_some(),
            MethodFilter::One(m) => routes
                .by_method
                .iter()
                .any(|r| r.method == MethodFilter::One(m.clone())),
        };
        if duplicate {
            return Err(Error::configuration(format!(
                "route `{method} {template}` is registered twice"
            )));
        }

        tracing::debug!(method = %method, template = %template, "Route registered");
        let entry = RouteEntry {
            method: method.clone(),
            template: template.to_string(),
            middleware,
            handler,
        };
        match method {
            MethodFilter::Any => routes.any = Some(entry),
            MethodFilter::One(_) => routes.by_method.push(entry),
        }
        Ok(())
    }

    /// Resolves `path` for `method`.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<'_> {
        let Ok(found) = self.matcher.at(path) else {
            return Lookup::NotFound;
        };
        let routes = &self.templates[*found.value];
        let specific = routes
            .by_method
            .iter()
            .find(|r| r.method == MethodFilter::One(method.clone()));
        match specific.or(routes.any.as_ref()) {
            Some(route) => match decode_params(&found.params) {
                Ok(params) => Lookup::Found { route, params },
                Err(error) => Lookup::Undecodable { route, error },
            },
            None => Lookup::MethodNotAllowed {
                allow: routes
                    .by_method
                    .iter()
                    .filter_map(|r| match &r.method {
                        MethodFilter::One(m) => Some(m.clone()),
                        MethodFilter::Any => None,
                    })
                    .collect(),
            },
        }
    }

    /// Every registered `(verb, template)`, in registration order per template.
    pub fn walk(&self) -> Vec<(MethodFilter, String)> {
        self.templates
            .iter()
            .flat_map(|t| t.by_method.iter().chain(t.any.iter()))
            .map(|r| (r.method.clone(), r.template.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates
            .iter()
            .map(|t| t.by_method.len() + usize::from(t.any.is_some()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable").field("routes", &self.walk()).finish()
    }
}

/// Joins a group prefix and a template.
pub(crate) fn join(prefix: &str, template: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match template {
        "" | "/" if !prefix.is_empty() => prefix.to_string(),
        _ if template.starts_with('/') => format!("{prefix}{template}"),
        _ => format!("{prefix}/{template}"),
    }
}

pub(crate) fn chain_of(middleware: &[Arc<dyn Middleware>]) -> Chain {
    Chain::new(middleware.iter().cloned())
}

fn decode_params(raw: &matchit::Params<'_, '_>) -> Result<PathParams, Error> {
    raw.iter()
        .map(|(name, value)| {
            let decoded = percent_decode_str(value)
                .decode_utf8()
                .map_err(|_| Error::binding(format!("path variable `{name}` is not valid UTF-8")))?;
            Ok((name.to_string(), decoded.into_owned()))
        })
        .collect::<Result<Vec<_>, Error>>()
        .map(PathParams::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Empty, Request, Response};
    use crate::status::Status;

    async fn noop(_: Request<Empty>) -> Result<Response<Empty>, Status> {
        Ok(Response::new(Empty {}))
    }

    #[test]
    fn finds_route_and_captures_params() {
        let mut table = RouteTable::new();
        table.get("/users/{id}", noop).unwrap();

        match table.lookup(&Method::GET, "/users/42") {
            Lookup::Found { route, params } => {
                assert_eq!(route.template, "/users/{id}");
                assert_eq!(params.get("id"), Some("42"));
            }
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[test]
    fn captured_params_are_percent_decoded() {
        let mut table = RouteTable::new();
        table.get("/greet/{name}", noop).unwrap();

        match table.lookup(&Method::GET, "/greet/Ada%20Lovelace") {
            Lookup::Found { params, .. } => assert_eq!(params.get("name"), Some("Ada Lovelace")),
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[test]
    fn non_utf8_param_is_a_binding_error() {
        let mut table = RouteTable::new();
        table.get("/greet/{name}", noop).unwrap();

        match table.lookup(&Method::GET, "/greet/%FF%FE") {
            Lookup::Undecodable { route, error } => {
                assert_eq!(route.template, "/greet/{name}");
                assert!(matches!(error, Error::Binding(_)));
            }
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[test]
    fn wrong_verb_reports_allowed_methods() {
        let mut table = RouteTable::new();
        table.get("/users/{id}", noop).unwrap().delete("/users/{id}", noop).unwrap();

        match table.lookup(&Method::POST, "/users/1") {
            Lookup::MethodNotAllowed { allow } => {
                assert_eq!(allow, vec![Method::GET, Method::DELETE]);
            }
            other => panic!("unexpected lookup: {other:?}"),
        }
        assert!(matches!(table.lookup(&Method::GET, "/nope"), Lookup::NotFound));
    }

    #[test]
    fn duplicate_route_is_a_configuration_error() {
        let mut table = RouteTable::new();
        table.get("/a", noop).unwrap();
        let err = table.get("/a", noop).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn conflicting_templates_are_rejected() {
        let mut table = RouteTable::new();
        table.get("/users/{id}", noop).unwrap();
        assert!(table.get("/users/{name}", noop).is_err());
    }

    #[test]
    fn relative_template_is_rejected() {
        let mut table = RouteTable::new();
        assert!(table.get("users", noop).is_err());
    }

    #[test]
    fn any_answers_unclaimed_verbs() {
        let mut table = RouteTable::new();
        table.get("/x", noop).unwrap().any("/x", noop).unwrap();

        match table.lookup(&Method::PATCH, "/x") {
            Lookup::Found { route, .. } => assert_eq!(route.method, MethodFilter::Any),
            other => panic!("unexpected lookup: {other:?}"),
        }
        match table.lookup(&Method::GET, "/x") {
            Lookup::Found { route, .. } => assert_eq!(route.method, MethodFilter::One(Method::GET)),
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[test]
    fn walk_lists_every_route() {
        let mut table = RouteTable::new();
        table.get("/a", noop).unwrap().post("/a", noop).unwrap().put("/b/{id}", noop).unwrap();
        let routes: Vec<String> = table
            .walk()
            .into_iter()
            .map(|(m, t)| format!("{m} {t}"))
            .collect();
        assert_eq!(routes, ["GET /a", "POST /a", "PUT /b/{id}"]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn join_normalises_slashes() {
        assert_eq!(join("/api/", "/users"), "/api/users");
        assert_eq!(join("/api", "/"), "/api");
        assert_eq!(join("", "/users"), "/users");
        assert_eq!(join("/api", "users"), "/api/users");
    }
}
