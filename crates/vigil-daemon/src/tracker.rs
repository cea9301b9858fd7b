//! Session tracker: the single consumer of sampler observations.
//!
//! Observations from all samplers funnel through one bounded channel, so
//! per-identity ordering is the channel's per-sender FIFO and the store
//! sees a single writer.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use vigil_core::ledger::SessionLedger;
use vigil_core::types::{truncate_to_second, PresenceEvent, PresenceState, Session};

use crate::store::{InsertOutcome, Store};

pub struct SessionTracker {
    rx: mpsc::Receiver<PresenceEvent>,
    store: Store,
    ledger: SessionLedger,
}

impl SessionTracker {
    pub fn new(rx: mpsc::Receiver<PresenceEvent>, store: Store) -> Self {
        Self {
            rx,
            store,
            ledger: SessionLedger::new(),
        }
    }

    /// Consume observations until every sampler has dropped its sender,
    /// then close all still-open sessions at the current time.
    ///
    /// Draining before finalizing guarantees no queued reading is lost, and
    /// makes the finalization writes the last mutation before the store
    /// connection is dropped.
    pub async fn run(mut self) {
        info!("session tracker started");
        while let Some(event) = self.rx.recv().await {
            self.record(&event);
        }
        let finalized = self.finalize_all(truncate_to_second(Utc::now()));
        info!(finalized, "session tracker stopped");
    }

    /// Apply one observation: append the presence event, then advance the
    /// session state machine and persist any session it closes.
    ///
    /// Store failures are reported and the observation dropped; a lost
    /// write must not take the sampling loop down with it.
    fn record(&mut self, event: &PresenceEvent) {
        match self.store.insert_event_if_absent(event) {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::AlreadyExists) => {
                debug!(
                    identity = %event.identity,
                    observed_at = %event.observed_at,
                    state = %event.state,
                    "duplicate presence event ignored"
                );
            }
            Err(e) => {
                error!(identity = %event.identity, error = %e, "presence event write failed");
            }
        }

        if let Some(session) = self
            .ledger
            .observe(&event.identity, event.state, event.observed_at)
        {
            self.persist_session(&session);
        }
    }

    fn persist_session(&self, session: &Session) {
        match self.store.insert_session_if_absent(session) {
            Ok(InsertOutcome::Inserted) => {
                info!(
                    identity = %session.identity,
                    started_at = %session.started_at,
                    ended_at = %session.ended_at,
                    duration_seconds = session.duration_seconds,
                    "session closed"
                );
            }
            Ok(InsertOutcome::AlreadyExists) => {
                debug!(identity = %session.identity, started_at = %session.started_at, "duplicate session ignored");
            }
            Err(e) => {
                error!(identity = %session.identity, error = %e, "session write failed");
            }
        }
    }

    /// Close every open session by synthesizing an offline observation at
    /// `now`, exactly as if the provider had reported it: the offline event
    /// is stored alongside the session record, so the event log always
    /// explains a session's end. Returns the number of open sessions that
    /// were reconciled (candidates with non-positive duration are discarded
    /// like any other).
    fn finalize_all(&mut self, now: DateTime<Utc>) -> usize {
        let open = self.ledger.open_identities();
        for identity in &open {
            info!(identity = %identity, ended_at = %now, "closing open session at shutdown");
            self.record(&PresenceEvent {
                identity: identity.clone(),
                observed_at: now,
                state: PresenceState::Offline,
            });
        }
        open.len()
    }
}
