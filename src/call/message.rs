//! Type-erased payloads and replies.

use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Any value a codec can serialize and middleware can log.
///
/// Blanket-implemented for every `Serialize + Debug + Send + Sync` type.
pub trait Message: erased_serde::Serialize + fmt::Debug + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + fmt::Debug + Send + Sync + 'static {}

erased_serde::serialize_trait_object!(Message);

/// Request or response type with no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Value produced by the middleware chain for one call.
pub struct Reply {
    message: Box<dyn Message>,
    status: Option<StatusCode>,
}

impl Reply {
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            message: Box::new(message),
            status: None,
        }
    }

    /// Success status for the textual protocol. Ignored by the binary adapter.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("message", &self.message)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct Greeting {
        message: String,
    }

    #[test]
    fn erased_message_serializes_like_the_concrete_type() {
        let reply = Reply::new(Greeting {
            message: "hi".into(),
        });
        let json = serde_json::to_string(reply.message()).unwrap();
        assert_eq!(json, r#"{"message":"hi"}"#);
        assert_eq!(reply.status(), None);
    }

    #[test]
    fn debug_shows_payload() {
        let reply = Reply::new(Empty {}).with_status(StatusCode::CREATED);
        let text = format!("{reply:?}");
        assert!(text.contains("Empty"));
        assert!(text.contains("201"));
    }
}
