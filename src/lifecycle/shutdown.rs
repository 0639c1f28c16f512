//! Shutdown coordination.

use tokio_util::sync::CancellationToken;

/// Handle that starts a graceful shutdown.
///
/// Clones share one signal; every long-running task holds a clone of the
/// token and stops accepting work once it fires.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins the drain. Calling it again has no effect.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the shutdown has been triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
