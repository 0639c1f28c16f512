//! One middleware chain across both protocols.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use twinport::call::Reply;
use twinport::middleware::{RequestId, SetHeader};
use twinport::{Application, CallContext, Error, Kind, Middleware, Next, Status};

use common::{grpc_call, HelloReply};

/// Records `(kind, path)` for every call it sees.
#[derive(Default)]
struct Audit {
    seen: Mutex<Vec<(Kind, String)>>,
}

#[async_trait]
impl Middleware for Audit {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        self.seen
            .lock()
            .unwrap()
            .push((ctx.kind(), ctx.path().to_string()));
        next.run(ctx).await
    }
}

/// Rejects calls without an `authorization` header.
struct RequireAuth;

#[async_trait]
impl Middleware for RequireAuth {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        if !ctx.request_headers().contains_key("authorization") {
            return Err(Status::unauthenticated("missing credentials").into());
        }
        next.run(ctx).await
    }
}

#[tokio::test]
async fn outgoing_header_written_exactly_once() {
    let builder = Application::builder(common::loopback_config())
        .middleware(Arc::new(SetHeader::try_new("x-trace", "1").unwrap()))
        .service(common::greeter());
    let app = common::spawn(builder).await;

    let response = reqwest::get(format!("http://{}/greet/Ada", app.addr)).await.unwrap();
    assert_eq!(response.headers().get_all("x-trace").iter().count(), 1);
    assert_eq!(response.headers()["x-handler"], "greeter");

    let reply = grpc_call(
        app.addr,
        "/greeter.Greeter/SayHello",
        "application/grpc+json",
        br#"{"name":"Ada"}"#,
    )
    .await;
    assert_eq!(reply.headers.get_all("x-trace").iter().count(), 1);
    assert_eq!(reply.headers["x-handler"], "greeter");
    assert_eq!(reply.json::<HelloReply>(0).message, "hi Ada");

    app.stop().await.unwrap();
}

#[tokio::test]
async fn header_restricted_to_textual_calls() {
    let builder = Application::builder(common::loopback_config())
        .middleware(Arc::new(
            SetHeader::try_new("x-frame-options", "DENY").unwrap().only(Kind::Textual),
        ))
        .service(common::greeter());
    let app = common::spawn(builder).await;

    let response = reqwest::get(format!("http://{}/greet/Ada", app.addr)).await.unwrap();
    assert_eq!(response.headers()["x-frame-options"], "DENY");

    let reply = grpc_call(app.addr, "/greeter.Greeter/SayHello", "application/grpc", br#"{"name":"Ada"}"#).await;
    assert!(reply.headers.get("x-frame-options").is_none());

    app.stop().await.unwrap();
}

#[tokio::test]
async fn same_chain_sees_both_protocols() {
    let audit = Arc::new(Audit::default());
    let builder = Application::builder(common::loopback_config())
        .middleware(audit.clone())
        .service(common::greeter());
    let app = common::spawn(builder).await;

    reqwest::get(format!("http://{}/greet/Ada", app.addr)).await.unwrap();
    grpc_call(app.addr, "/greeter.Greeter/SayHello", "application/grpc", br#"{"name":"Ada"}"#).await;

    let seen = audit.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (Kind::Textual, "/greet/Ada".to_string()),
            (Kind::Binary, "/greeter.Greeter/SayHello".to_string()),
        ]
    );

    app.stop().await.unwrap();
}

#[tokio::test]
async fn short_circuit_maps_to_each_protocol() {
    let builder = Application::builder(common::loopback_config())
        .middleware(Arc::new(RequireAuth))
        .service(common::greeter());
    let app = common::spawn(builder).await;

    let response = reqwest::get(format!("http://{}/greet/Ada", app.addr)).await.unwrap();
    assert_eq!(response.status(), 401);

    let reply = grpc_call(app.addr, "/greeter.Greeter/SayHello", "application/grpc", br#"{"name":"Ada"}"#).await;
    assert_eq!(reply.grpc_status(), Some("16"));

    let authorized = reqwest::Client::new()
        .get(format!("http://{}/greet/Ada", app.addr))
        .header("authorization", "Bearer t")
        .send()
        .await
        .unwrap();
    assert_eq!(authorized.status(), 200);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn request_id_is_echoed() {
    let builder = Application::builder(common::loopback_config())
        .middleware(Arc::new(RequestId))
        .service(common::greeter());
    let app = common::spawn(builder).await;

    let client = reqwest::Client::new();
    let given = client
        .get(format!("http://{}/greet/Ada", app.addr))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(given.headers()["x-request-id"], "abc-123");

    let generated = client.get(format!("http://{}/greet/Ada", app.addr)).send().await.unwrap();
    assert!(!generated.headers()["x-request-id"].is_empty());

    app.stop().await.unwrap();
}

#[tokio::test]
async fn response_codec_follows_accept() {
    let app = common::spawn(Application::builder(common::loopback_config()).service(common::greeter())).await;
    let client = reqwest::Client::new();

    let xml = client
        .get(format!("http://{}/greet/Ada", app.addr))
        .header("accept", "application/xml")
        .send()
        .await
        .unwrap();
    assert_eq!(xml.status(), 200);
    assert!(xml.headers()["content-type"].to_str().unwrap().contains("xml"));
    assert!(xml.text().await.unwrap().contains("hi Ada"));

    let unparseable = client
        .get(format!("http://{}/greet/Ada", app.addr))
        .header("accept", "garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(unparseable.text().await.unwrap(), r#"{"message":"hi Ada"}"#);

    let unregistered = client
        .get(format!("http://{}/greet/Ada", app.addr))
        .header("accept", "application/yaml")
        .send()
        .await
        .unwrap();
    assert_eq!(unregistered.status(), 406);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn post_body_binds_with_its_codec() {
    let app = common::spawn(Application::builder(common::loopback_config()).service(common::greeter())).await;
    let client = reqwest::Client::new();

    let json = client
        .post(format!("http://{}/greet", app.addr))
        .json(&serde_json::json!({ "name": "Ada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(json.text().await.unwrap(), r#"{"message":"hi Ada"}"#);

    let form = client
        .post(format!("http://{}/greet", app.addr))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("name=Grace")
        .send()
        .await
        .unwrap();
    assert_eq!(form.text().await.unwrap(), r#"{"message":"hi Grace"}"#);

    let unregistered = client
        .post(format!("http://{}/greet", app.addr))
        .header("content-type", "application/yaml")
        .body("name: Ada")
        .send()
        .await
        .unwrap();
    assert_eq!(unregistered.status(), 415);

    app.stop().await.unwrap();
}
