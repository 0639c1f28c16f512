//! Graceful drain and forced close.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use twinport::{Application, Error, Request, Response, ServiceDescriptor, Status};

use common::{HelloReply, HelloRequest};

async fn slow_hello(request: Request<HelloRequest>) -> Result<Response<HelloReply>, Status> {
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(Response::new(HelloReply {
        message: format!("hi {}", request.into_message().name),
    }))
}

#[tokio::test]
async fn in_flight_call_completes_within_grace() {
    let mut config = common::loopback_config();
    config.shutdown.grace_ms = 5_000;
    let service = ServiceDescriptor::new("slow.Slow").route(Method::GET, "/slow/{name}", slow_hello);
    let app = common::spawn(Application::builder(config).service(service)).await;

    let url = format!("http://{}/slow/Ada", app.addr);
    let call = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped = tokio::spawn(app.stop());
    let response = call.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"message":"hi Ada"}"#);

    stopped.await.unwrap().unwrap();
}

#[tokio::test]
async fn grace_exceeded_cancels_in_flight_call() {
    let mut config = common::loopback_config();
    config.shutdown.grace_ms = 100;

    let observed = Arc::new(AtomicBool::new(false));
    let flag = observed.clone();
    let hang = move |request: Request<HelloRequest>| {
        let flag = flag.clone();
        async move {
            tokio::select! {
                _ = request.cancelled() => {
                    flag.store(true, Ordering::SeqCst);
                    Err(Status::cancelled("shutting down"))
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    Ok(Response::new(HelloReply { message: "too late".to_string() }))
                }
            }
        }
    };
    let service = ServiceDescriptor::new("hang.Hang").route(Method::GET, "/hang/{name}", hang);
    let app = common::spawn(Application::builder(config).service(service)).await;

    let url = format!("http://{}/hang/Ada", app.addr);
    let _call = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = app.stop().await.unwrap_err();
    assert!(matches!(err, Error::Shutdown { protocol: "textual", .. }), "{err}");
    assert!(observed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn idle_application_stops_cleanly() {
    let app = common::spawn(Application::builder(common::loopback_config()).service(common::greeter())).await;
    let addr = app.addr;
    app.stop().await.unwrap();

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
