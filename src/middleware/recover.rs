//! Panic containment.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::call::{CallContext, Reply};
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::status::Status;

/// Turns a panic in any deeper layer or handler into `Status::internal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recover;

#[async_trait]
impl Middleware for Recover {
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<Reply, Error> {
        let path = ctx.path().to_string();
        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(path = %path, panic = %message, "Recovered from handler panic");
                Err(Status::internal(format!("panic: {message}")).into())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
