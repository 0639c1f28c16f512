//! Response writing for the textual protocol.
//!
//! # Responsibilities
//! - Encode replies with the negotiated codec
//! - Render errors as a structured `{code, message}` body
//! - Flush the headers middleware accumulated, exactly once per response
//!
//! # Design Decisions
//! - Headers collected on the call context are appended after the writer's
//!   own `Content-Type`, so middleware may add but not replace it
//! - A body that cannot be encoded degrades to a plain-text 500

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::call::{Message, Reply};
use crate::codec::Codec;
use crate::error::Error;
use crate::status::Code;

/// Stable error shape returned to textual clients.
#[derive(Debug, Serialize)]
#[serde(rename = "error")]
pub struct ErrorBody {
    pub code: Code,
    pub message: String,
}

impl ErrorBody {
    pub fn from_error(err: &Error) -> Self {
        let message = match err {
            Error::Handler(status) => status.message().to_string(),
            other => other.to_string(),
        };
        Self {
            code: err.code(),
            message,
        }
    }
}

/// Writes a successful reply.
pub fn reply(reply: &Reply, codec: &dyn Codec, flushed: HeaderMap) -> Response {
    encode(reply.status().unwrap_or(StatusCode::OK), reply.message(), codec, flushed)
}

/// Writes a failed call.
pub fn error(err: &Error, codec: &dyn Codec, flushed: HeaderMap) -> Response {
    let status = err.http_status();
    if status.is_server_error() {
        tracing::error!(error = %err, status = %status, "Call failed");
    } else {
        tracing::debug!(error = %err, status = %status, "Call rejected");
    }
    encode(status, &ErrorBody::from_error(err), codec, flushed)
}

/// 405 with the `Allow` header.
pub fn method_not_allowed(allow: &[Method], codec: &dyn Codec) -> Response {
    let listed = allow.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&listed) {
        headers.insert(header::ALLOW, value);
    }
    let body = ErrorBody {
        code: Code::Unimplemented,
        message: "method not allowed".to_string(),
    };
    encode(StatusCode::METHOD_NOT_ALLOWED, &body, codec, headers)
}

pub fn not_found(path: &str, codec: &dyn Codec) -> Response {
    let body = ErrorBody {
        code: Code::NotFound,
        message: format!("no route for {path}"),
    };
    encode(StatusCode::NOT_FOUND, &body, codec, HeaderMap::new())
}

fn encode(status: StatusCode, message: &dyn Message, codec: &dyn Codec, flushed: HeaderMap) -> Response {
    let bytes = match codec.marshal(message) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode response");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(codec.content_type()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    let headers = response.headers_mut();
    let mut current = None;
    for (name, value) in flushed {
        if let Some(name) = name {
            current = Some(name);
        }
        if let Some(name) = &current {
            if name == header::CONTENT_TYPE {
                continue;
            }
            headers.append(name.clone(), value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, XmlCodec};
    use crate::error::CodecError;
    use crate::status::Status;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn handler_error_has_stable_shape() {
        let err = Error::from(Status::not_found("no such user"));
        let response = error(&err, &JsonCodec, HeaderMap::new());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_text(response).await,
            r#"{"code":"not_found","message":"no such user"}"#
        );
    }

    #[test]
    fn flushed_headers_are_appended_once() {
        let mut flushed = HeaderMap::new();
        flushed.append("x-trace", HeaderValue::from_static("1"));
        flushed.append("content-type", HeaderValue::from_static("text/evil"));

        let response = reply(&Reply::new(crate::call::Empty {}), &JsonCodec, flushed);
        assert_eq!(response.headers().get_all("x-trace").iter().count(), 1);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn codec_error_body_in_xml() {
        let err = Error::from(CodecError::Unregistered { token: "yaml".into() });
        let response = error(&err, &XmlCodec, HeaderMap::new());
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let text = body_text(response).await;
        assert!(text.starts_with("<error>"), "{text}");
        assert!(text.contains("<code>unimplemented</code>"), "{text}");
    }

    #[test]
    fn method_not_allowed_lists_verbs() {
        let response = method_not_allowed(&[Method::GET, Method::DELETE], &JsonCodec);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, DELETE");
    }
}
