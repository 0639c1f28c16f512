//! Typed request and response values seen by handlers.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::call::context::{CallContext, Kind};

/// Named path variables captured by a route template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn new(params: Vec<(String, String)>) -> Self {
        Self(params)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// File field of a multipart body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Request handed to a handler: the decoded message plus call metadata.
#[derive(Debug)]
pub struct Request<T> {
    kind: Kind,
    method: String,
    path: String,
    headers: HeaderMap,
    params: PathParams,
    files: Vec<FilePart>,
    cancel: CancellationToken,
    message: T,
}

impl<T> Request<T> {
    /// Standalone request, mostly useful for calling handlers in tests.
    pub fn new(message: T) -> Self {
        Self {
            kind: Kind::Textual,
            method: String::new(),
            path: String::new(),
            headers: HeaderMap::new(),
            params: PathParams::default(),
            files: Vec::new(),
            cancel: CancellationToken::new(),
            message,
        }
    }

    pub(crate) fn from_context(
        ctx: &CallContext,
        params: PathParams,
        files: Vec<FilePart>,
        message: T,
    ) -> Self {
        Self {
            kind: ctx.kind(),
            method: ctx.method().to_string(),
            path: ctx.path().to_string(),
            headers: ctx.request_headers().clone(),
            params,
            files,
            cancel: ctx.cancellation().clone(),
            message,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn path_params(&self) -> &PathParams {
        &self.params
    }

    pub fn files(&self) -> &[FilePart] {
        &self.files
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub fn into_message(self) -> T {
        self.message
    }

    /// Resolves when the server stops waiting for this call.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handler result: the reply message plus headers to merge into the
/// call's outgoing headers.
#[derive(Debug)]
pub struct Response<T> {
    headers: HeaderMap,
    status: Option<StatusCode>,
    message: T,
}

impl<T> Response<T> {
    pub fn new(message: T) -> Self {
        Self {
            headers: HeaderMap::new(),
            status: None,
            message,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Success status for textual calls (defaults to 200).
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub(crate) fn into_parts(self) -> (HeaderMap, Option<StatusCode>, T) {
        (self.headers, self.status, self.message)
    }
}

impl<T> From<T> for Response<T> {
    fn from(message: T) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_params_lookup() {
        let params = PathParams::new(vec![("id".into(), "42".into())]);
        assert_eq!(params.get("id"), Some("42"));
        assert!(params.get("name").is_none());
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn request_copies_context_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user", HeaderValue::from_static("ada"));
        let ctx = CallContext::textual("GET", "/greet/Ada", headers, CancellationToken::new());
        let params = PathParams::new(vec![("name".into(), "Ada".into())]);
        let request = Request::from_context(&ctx, params, Vec::new(), 7u32);

        assert_eq!(request.method(), "GET");
        assert_eq!(request.path(), "/greet/Ada");
        assert_eq!(request.headers().get("x-user").unwrap(), "ada");
        assert_eq!(request.path_param("name"), Some("Ada"));
        assert_eq!(*request.message(), 7);
    }

    #[test]
    fn response_headers_accumulate() {
        let response = Response::new("ok")
            .with_header(HeaderName::from_static("x-a"), HeaderValue::from_static("1"))
            .with_header(HeaderName::from_static("x-a"), HeaderValue::from_static("2"));
        assert_eq!(response.headers().get_all("x-a").iter().count(), 2);
    }
}
