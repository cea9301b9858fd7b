//! Presence data model.
//!
//! All timestamps are UTC and truncated to whole seconds before they are
//! recorded or compared; `truncate_to_second` is the single place that
//! enforces this.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Online/offline state of a tracked identity at one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

impl PresenceState {
    /// Stable text form used in the store and on log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Offline => "offline",
        }
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reading returned by the presence provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceReading {
    pub state: PresenceState,
    /// Provider-reported last-seen time for offline readings. Absent when
    /// the provider does not expose it (privacy settings, coarse states).
    pub last_seen: Option<DateTime<Utc>>,
}

/// A durable presence observation. At most one event per
/// `(identity, observed_at, state)` triple is ever stored; re-sending an
/// identical observation is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub identity: String,
    pub observed_at: DateTime<Utc>,
    pub state: PresenceState,
}

/// One contiguous online interval. `ended_at > started_at` holds for every
/// persisted session; `duration_seconds` is always `ended_at - started_at`
/// in whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub identity: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

/// A tracked identity: created on first observation, never deleted,
/// excluded from polling when `active` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedIdentity {
    pub id: i64,
    pub handle: String,
    pub active: bool,
}

/// Truncate a timestamp to whole seconds.
pub fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn presence_state_text_form() {
        assert_eq!(PresenceState::Online.as_str(), "online");
        assert_eq!(PresenceState::Offline.as_str(), "offline");
        assert_eq!(PresenceState::Online.to_string(), "online");
    }

    #[test]
    fn presence_state_serde_lowercase() {
        let json = serde_json::to_string(&PresenceState::Offline).expect("should serialize");
        assert_eq!(json, "\"offline\"");
        let back: PresenceState = serde_json::from_str("\"online\"").expect("should deserialize");
        assert_eq!(back, PresenceState::Online);
    }

    #[test]
    fn truncate_to_second_drops_subsecond_precision() {
        let ts = Utc
            .with_ymd_and_hms(2026, 3, 1, 10, 30, 45)
            .unwrap()
            .with_nanosecond(987_654_321)
            .unwrap();
        let truncated = truncate_to_second(ts);
        assert_eq!(truncated.nanosecond(), 0);
        assert_eq!(truncated, Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 45).unwrap());
    }

    #[test]
    fn truncate_to_second_is_idempotent() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(truncate_to_second(ts), ts);
    }

    #[test]
    fn presence_event_round_trip() {
        let event = PresenceEvent {
            identity: "alice".into(),
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
            state: PresenceState::Online,
        };
        let json = serde_json::to_string(&event).expect("should serialize");
        let back: PresenceEvent = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back, event);
    }
}
