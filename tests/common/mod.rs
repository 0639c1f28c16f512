//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use twinport::config::AppConfig;
use twinport::net::MuxStats;
use twinport::{ApplicationBuilder, Error, Request, Response, ServiceDescriptor, Shutdown, Status};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelloRequest {
    pub name: String,
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HelloReply {
    pub message: String,
}

pub async fn say_hello(request: Request<HelloRequest>) -> Result<Response<HelloReply>, Status> {
    let name = request.into_message().name;
    if name == "nobody" {
        return Err(Status::not_found("no such person"));
    }
    Ok(Response::new(HelloReply {
        message: format!("hi {name}"),
    })
    .with_header(
        axum::http::HeaderName::from_static("x-handler"),
        axum::http::HeaderValue::from_static("greeter"),
    ))
}

pub async fn say_hello_stream(
    request: Request<HelloRequest>,
) -> Result<impl Stream<Item = Result<HelloReply, Status>>, Status> {
    let HelloRequest { name, count } = request.into_message();
    Ok(stream::iter((1..=count.unwrap_or(3)).map(move |n| {
        Ok(HelloReply {
            message: format!("hi {name} #{n}"),
        })
    })))
}

/// The demo service: one unary and one streaming method, two routes.
pub fn greeter() -> ServiceDescriptor {
    ServiceDescriptor::new("greeter.Greeter")
        .unary("SayHello", say_hello)
        .server_streaming("SayHelloStream", say_hello_stream)
        .route(Method::GET, "/greet/{name}", say_hello)
        .route(Method::POST, "/greet", say_hello)
}

/// Default configuration bound to a dynamic loopback port.
pub fn loopback_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.address = Some("127.0.0.1:0".to_string());
    config
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub stats: Option<Arc<MuxStats>>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), Error>>,
}

impl TestApp {
    /// Triggers shutdown and waits for `run` to return.
    pub async fn stop(self) -> Result<(), Error> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("application did not stop")
            .expect("application task panicked")
    }
}

/// Builds and runs an application in the background.
pub async fn spawn(builder: ApplicationBuilder) -> TestApp {
    let app = builder.build().await.expect("application builds");
    let http_addr = app.http_addr().expect("textual server enabled");
    let grpc_addr = app.grpc_addr().expect("binary server enabled");
    TestApp {
        addr: app.local_addr().unwrap_or(http_addr),
        http_addr,
        grpc_addr,
        stats: app.mux_stats(),
        shutdown: app.shutdown_handle(),
        handle: tokio::spawn(app.run()),
    }
}

/// Wraps one message in the 5-byte length prefix.
pub fn grpc_frame(message: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(5 + message.len());
    out.extend_from_slice(&[0]);
    out.extend_from_slice(&(message.len() as u32).to_be_bytes());
    out.extend_from_slice(message);
    out.freeze()
}

/// Splits a response body into its length-prefixed messages.
pub fn grpc_messages(mut body: Bytes) -> Vec<Bytes> {
    let mut messages = Vec::new();
    while body.remaining() >= 5 {
        let _compressed = body.get_u8();
        let len = body.get_u32() as usize;
        messages.push(body.split_to(len));
    }
    messages
}

pub struct GrpcReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub messages: Vec<Bytes>,
}

impl GrpcReply {
    /// `grpc-status`, from trailers or, for trailers-only replies, headers.
    pub fn grpc_status(&self) -> Option<&str> {
        self.trailers
            .get("grpc-status")
            .or_else(|| self.headers.get("grpc-status"))
            .and_then(|v| v.to_str().ok())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self, index: usize) -> T {
        serde_json::from_slice(&self.messages[index]).expect("json message")
    }
}

/// Performs one call with a plain HTTP/2 (prior knowledge) client.
pub async fn grpc_call(addr: SocketAddr, path: &str, content_type: &str, message: &[u8]) -> GrpcReply {
    let client = Client::builder(TokioExecutor::new())
        .http2_only(true)
        .build_http::<Full<Bytes>>();
    let request = hyper::Request::builder()
        .method(Method::POST)
        .uri(format!("http://{addr}{path}"))
        .header("content-type", content_type)
        .header("te", "trailers")
        .body(Full::new(grpc_frame(message)))
        .expect("request");

    let response = client.request(request).await.expect("grpc call");
    let (parts, body) = response.into_parts();
    let collected = body.collect().await.expect("grpc body");
    let trailers = collected.trailers().cloned().unwrap_or_default();
    GrpcReply {
        status: parts.status,
        headers: parts.headers,
        trailers,
        messages: grpc_messages(collected.to_bytes()),
    }
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
