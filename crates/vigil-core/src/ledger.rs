//! Open-session bookkeeping.
//!
//! Pure state machine with no IO or async dependencies: observations go in,
//! closed `Session` records come out. The daemon's tracker task owns exactly
//! one ledger, so transitions for any given identity are applied in the
//! order the readings were taken.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{PresenceState, Session};

/// Maps each identity to the start of its currently open session. An entry
/// exists while the identity is observed online; there is never more than
/// one open session per identity.
#[derive(Debug, Default)]
pub struct SessionLedger {
    open: HashMap<String, DateTime<Utc>>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one observation. Returns the closed session when an
    /// online→offline transition with positive duration occurs.
    ///
    /// Repeated online readings keep the original start time. An offline
    /// reading that does not yield a positive duration (clock skew,
    /// out-of-order delivery) clears the open entry without producing a
    /// session. An offline reading with no open session is a no-op.
    pub fn observe(
        &mut self,
        identity: &str,
        state: PresenceState,
        at: DateTime<Utc>,
    ) -> Option<Session> {
        match state {
            PresenceState::Online => {
                self.open.entry(identity.to_string()).or_insert(at);
                None
            }
            PresenceState::Offline => {
                let started_at = self.open.remove(identity)?;
                let duration = (at - started_at).num_seconds();
                (duration > 0).then(|| Session {
                    identity: identity.to_string(),
                    started_at,
                    ended_at: at,
                    duration_seconds: duration,
                })
            }
        }
    }

    /// Identities with an open session, sorted for deterministic iteration.
    pub fn open_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.open.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Start of the open session for `identity`, if one is open.
    pub fn open_since(&self, identity: &str) -> Option<DateTime<Utc>> {
        self.open.get(identity).copied()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
