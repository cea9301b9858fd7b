//! Per-identity polling loop.
//!
//! One sampler task runs for each tracked identity. Each iteration queries
//! the provider, hands the observation to the tracker channel, then sleeps
//! for the polling interval. Every wait is interruptible by the shutdown
//! token, so stop latency is bounded by the in-flight provider call, not by
//! the interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_core::provider::{PresenceProvider, ProviderError};
use vigil_core::types::{truncate_to_second, PresenceEvent, PresenceReading, PresenceState};

pub struct Sampler<P: PresenceProvider + ?Sized> {
    handle: String,
    provider: Arc<P>,
    interval: Duration,
    tx: mpsc::Sender<PresenceEvent>,
    cancel: CancellationToken,
}

impl<P: PresenceProvider + ?Sized + 'static> Sampler<P> {
    pub fn new(
        handle: String,
        provider: Arc<P>,
        interval: Duration,
        tx: mpsc::Sender<PresenceEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handle,
            provider,
            interval,
            tx,
            cancel,
        }
    }

    /// Run the polling loop. Returns once the cancellation token fires, or
    /// early if the tracker channel closes underneath us.
    ///
    /// A provider failure never ends the loop: rate limiting suspends this
    /// identity for the provider-specified delay and skips the cycle, any
    /// other failure is recorded as an "offline, now" approximation.
    pub async fn run(self) {
        info!(identity = %self.handle, "sampler started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let event = match self.query().await {
                Ok(reading) => Some(self.to_event(reading)),
                Err(ProviderError::RateLimited { retry_after }) => {
                    debug!(
                        identity = %self.handle,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "rate limited, suspending poll loop"
                    );
                    if self.wait(retry_after).await {
                        break;
                    }
                    // Resume immediately after the backoff; no event for
                    // this cycle.
                    continue;
                }
                Err(e) => {
                    warn!(identity = %self.handle, error = %e, "provider failure, degrading to offline");
                    Some(PresenceEvent {
                        identity: self.handle.clone(),
                        observed_at: truncate_to_second(Utc::now()),
                        state: PresenceState::Offline,
                    })
                }
            };

            if let Some(event) = event {
                // Record-then-continue: the send completes before the sleep
                // starts, so per-identity event order is preserved.
                if self.tx.send(event).await.is_err() {
                    warn!(identity = %self.handle, "tracker channel closed, stopping sampler");
                    break;
                }
            }

            if self.wait(self.interval).await {
                break;
            }
        }
        info!(identity = %self.handle, "sampler stopped");
    }

    /// Query the provider on the blocking pool so slow I/O only suspends
    /// this identity's task.
    async fn query(&self) -> Result<PresenceReading, ProviderError> {
        let provider = Arc::clone(&self.provider);
        let handle = self.handle.clone();
        match tokio::task::spawn_blocking(move || provider.get_presence(&handle)).await {
            Ok(result) => result,
            Err(e) => Err(ProviderError::Failed(format!("provider task failed: {e}"))),
        }
    }

    /// Convert a provider reading into a presence event.
    ///
    /// Online readings are stamped with the poll time. Offline readings use
    /// the provider's reported last-seen time when present; when the
    /// provider does not know it, the poll time stands in as an
    /// approximation of the session boundary, not a measurement of it.
    fn to_event(&self, reading: PresenceReading) -> PresenceEvent {
        let now = truncate_to_second(Utc::now());
        let (observed_at, approximate) = match reading.state {
            PresenceState::Online => (now, false),
            PresenceState::Offline => match reading.last_seen {
                Some(seen) => (truncate_to_second(seen), false),
                None => (now, true),
            },
        };
        info!(
            identity = %self.handle,
            state = %reading.state,
            observed_at = %observed_at,
            approximate,
            "presence observed"
        );
        PresenceEvent {
            identity: self.handle.clone(),
            observed_at,
            state: reading.state,
        }
    }

    /// Interruptible wait. Returns true when cancellation fired.
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.cancel.cancelled() => true,
        }
    }
}
