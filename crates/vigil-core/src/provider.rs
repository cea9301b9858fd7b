//! Seam to the external presence provider.

use std::time::Duration;

use thiserror::Error;

use crate::types::PresenceReading;

/// Failure taxonomy for presence queries.
///
/// `RateLimited` is transient: the caller suspends the affected identity's
/// loop for `retry_after` and emits nothing for that cycle. The other
/// variants degrade the cycle to an "offline, now" approximation rather
/// than terminating the loop.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("provider failed: {0}")]
    Failed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client for the external presence provider.
///
/// Implementations may block: the daemon drives every call through
/// `spawn_blocking`, so one identity's query never stalls another's loop.
pub trait PresenceProvider: Send + Sync {
    /// Fetch the current presence reading for `handle`.
    fn get_presence(&self, handle: &str) -> Result<PresenceReading, ProviderError>;
}
