//! Process-wide shutdown coordination.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// One-shot cancellation signal fanned out to every task.
///
/// `trigger` only flips the token, with no I/O and no blocking, so it is
/// safe to call from any execution context, including the signal-handling
/// path.
/// Triggering more than once is harmless.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by samplers at every suspension point.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the signal fires.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Trip the signal on ctrl-c or SIGTERM.
    pub async fn listen_for_signals(self) {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received ctrl-c, shutting down");
        }

        self.trigger();
    }
}
