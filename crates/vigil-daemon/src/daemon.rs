//! Daemon wiring: roster load, task spawn, graceful stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vigil_core::provider::PresenceProvider;

use crate::sampler::Sampler;
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::tracker::SessionTracker;

/// Capacity of the sampler → tracker observation channel.
const OBSERVATION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct DaemonOpts {
    pub db_path: PathBuf,
    pub poll_interval: Duration,
}

/// Run the sampling engine until the shutdown signal fires.
///
/// The stop sequence rides on channel closure: the signal stops every
/// sampler at its next suspension point (in-flight provider calls finish
/// naturally), the samplers drop their senders as they exit, and the
/// tracker then drains whatever is queued, closes all open sessions, and
/// releases the store. Nothing exits before its downstream is done.
pub async fn run_daemon<P: PresenceProvider + 'static>(
    opts: DaemonOpts,
    provider: Arc<P>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let store = Store::open(&opts.db_path)
        .with_context(|| format!("failed to open database at {}", opts.db_path.display()))?;
    let identities = store
        .active_identities()
        .context("failed to load active identities")?;

    info!(
        db = %opts.db_path.display(),
        identities = identities.len(),
        poll_interval_secs = opts.poll_interval.as_secs(),
        "vigil daemon starting"
    );

    if identities.is_empty() {
        // Stay up as a controllable service; identities tracked from now on
        // are picked up on the next start.
        warn!("no active identities to poll, waiting for shutdown signal");
        shutdown.triggered().await;
        info!("vigil daemon stopped");
        return Ok(());
    }

    let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_CAPACITY);
    let tracker_handle = tokio::spawn(SessionTracker::new(rx, store).run());

    let mut samplers = Vec::with_capacity(identities.len());
    for identity in identities {
        let sampler = Sampler::new(
            identity,
            Arc::clone(&provider),
            opts.poll_interval,
            tx.clone(),
            shutdown.token(),
        );
        samplers.push(tokio::spawn(sampler.run()));
    }
    // The tracker must only see sampler-held senders, or it would never
    // observe the channel closing.
    drop(tx);

    // Joining the samplers is the wait for shutdown: each runs until the
    // cancellation token fires.
    for handle in samplers {
        if let Err(e) = handle.await {
            warn!(error = %e, "sampler task failed");
        }
    }
    tracker_handle
        .await
        .context("session tracker task failed")?;

    info!("vigil daemon stopped");
    Ok(())
}
