//! SQLite persistence for identities, presence events, and online sessions.
//!
//! The daemon owns exactly one connection (single writer, inside the
//! tracker task); CLI subcommands open their own short-lived connections.
//! Event and session writes go through `INSERT OR IGNORE` so duplicate
//! observations and duplicate closes are absorbed by the uniqueness
//! constraints instead of surfacing as errors.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use vigil_core::types::{PresenceEvent, Session, TrackedIdentity};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Outcome of an insert-if-absent write. `AlreadyExists` is expected under
/// re-delivery and is treated as success by every caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                handle TEXT UNIQUE NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS presence_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id INTEGER NOT NULL REFERENCES identities(id),
                observed_at TEXT NOT NULL,
                state       TEXT NOT NULL,
                UNIQUE(identity_id, observed_at, state)
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id      INTEGER NOT NULL REFERENCES identities(id),
                started_at       TEXT NOT NULL,
                ended_at         TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL,
                UNIQUE(identity_id, started_at)
            );",
        )?;
        Ok(())
    }

    /// Intern a handle, creating the identity row on first observation.
    pub fn ensure_identity(&self, handle: &str) -> Result<i64, StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM identities WHERE handle = ?1",
                params![handle],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO identities(handle) VALUES (?1)",
            params![handle],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Register a handle for polling. Reactivates a previously deactivated
    /// identity; registering an already-active handle is a no-op.
    pub fn add_identity(&self, handle: &str) -> Result<(), StoreError> {
        let id = self.ensure_identity(handle)?;
        self.conn.execute(
            "UPDATE identities SET active = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Exclude a handle from future polling without losing its history.
    /// Returns false when the handle was never tracked.
    pub fn deactivate_identity(&self, handle: &str) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE identities SET active = 0 WHERE handle = ?1",
            params![handle],
        )?;
        Ok(changed > 0)
    }

    /// Handles the daemon polls, read once at startup. Ordered by handle.
    pub fn active_identities(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT handle FROM identities WHERE active = 1 ORDER BY handle")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut handles = Vec::new();
        for row in rows {
            handles.push(row?);
        }
        Ok(handles)
    }

    /// All known identities, active or not. Ordered by handle.
    pub fn list_identities(&self) -> Result<Vec<TrackedIdentity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, handle, active FROM identities ORDER BY handle")?;
        let rows = stmt.query_map([], |row| {
            Ok(TrackedIdentity {
                id: row.get(0)?,
                handle: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
            })
        })?;
        let mut identities = Vec::new();
        for row in rows {
            identities.push(row?);
        }
        Ok(identities)
    }

    /// Append a presence event unless the identical
    /// `(identity, observed_at, state)` triple is already stored.
    pub fn insert_event_if_absent(
        &self,
        event: &PresenceEvent,
    ) -> Result<InsertOutcome, StoreError> {
        let identity_id = self.ensure_identity(&event.identity)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO presence_events(identity_id, observed_at, state)
             VALUES (?1, ?2, ?3)",
            params![
                identity_id,
                event.observed_at.to_rfc3339(),
                event.state.as_str(),
            ],
        )?;
        Ok(if changed == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Persist a closed session unless one already starts at the same time
    /// for this identity.
    pub fn insert_session_if_absent(
        &self,
        session: &Session,
    ) -> Result<InsertOutcome, StoreError> {
        let identity_id = self.ensure_identity(&session.identity)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO sessions(identity_id, started_at, ended_at, duration_seconds)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity_id,
                session.started_at.to_rfc3339(),
                session.ended_at.to_rfc3339(),
                session.duration_seconds,
            ],
        )?;
        Ok(if changed == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Most recent persisted sessions, newest first.
    pub fn recent_sessions(&self, limit: u32) -> Result<Vec<Session>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.handle, s.started_at, s.ended_at, s.duration_seconds
             FROM sessions s JOIN identities i ON i.id = s.identity_id
             ORDER BY s.started_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let started_at: String = row.get(1)?;
            let ended_at: String = row.get(2)?;
            Ok(Session {
                identity: row.get(0)?,
                started_at: parse_ts(&started_at, 1)?,
                ended_at: parse_ts(&ended_at, 2)?,
                duration_seconds: row.get(3)?,
            })
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }
}

/// Parse a stored RFC 3339 timestamp back into a UTC datetime.
fn parse_ts(raw: &str, column: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

// Query helpers for tests in other modules of this crate.
#[cfg(test)]
impl Store {
    /// `(observed_at, state)` rows for a handle, ordered by timestamp.
    pub(crate) fn events_for(&self, handle: &str) -> Vec<(String, String)> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT e.observed_at, e.state
                 FROM presence_events e JOIN identities i ON i.id = e.identity_id
                 WHERE i.handle = ?1
                 ORDER BY e.observed_at",
            )
            .unwrap();
        let rows = stmt
            .query_map(params![handle], |row| {
                let observed_at: String = row.get(0)?;
                let state: String = row.get(1)?;
                Ok((observed_at, state))
            })
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    pub(crate) fn sessions_for(&self, handle: &str) -> Vec<Session> {
        self.recent_sessions(u32::MAX)
            .unwrap()
            .into_iter()
            .filter(|s| s.identity == handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vigil_core::types::PresenceState;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    fn event(identity: &str, at: DateTime<Utc>, state: PresenceState) -> PresenceEvent {
        PresenceEvent {
            identity: identity.into(),
            observed_at: at,
            state,
        }
    }

    #[test]
    fn open_in_memory_creates_schema() {
        let store = Store::open_in_memory().expect("should open in-memory db");
        assert!(store.active_identities().unwrap().is_empty());
        assert!(store.recent_sessions(10).unwrap().is_empty());
    }

    #[test]
    fn ensure_identity_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let first = store.ensure_identity("alice").unwrap();
        let second = store.ensure_identity("alice").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn add_and_deactivate_identity() {
        let store = Store::open_in_memory().unwrap();
        store.add_identity("alice").unwrap();
        store.add_identity("bob").unwrap();
        assert_eq!(store.active_identities().unwrap(), vec!["alice", "bob"]);

        assert!(store.deactivate_identity("alice").unwrap());
        assert_eq!(store.active_identities().unwrap(), vec!["bob"]);

        // History survives deactivation.
        let all = store.list_identities().unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].active);
        assert!(all[1].active);
    }

    #[test]
    fn deactivate_unknown_identity_returns_false() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.deactivate_identity("nobody").unwrap());
    }

    #[test]
    fn reactivating_deactivated_identity_keeps_id() {
        let store = Store::open_in_memory().unwrap();
        store.add_identity("alice").unwrap();
        let id = store.ensure_identity("alice").unwrap();
        store.deactivate_identity("alice").unwrap();
        store.add_identity("alice").unwrap();
        assert_eq!(store.ensure_identity("alice").unwrap(), id);
        assert_eq!(store.active_identities().unwrap(), vec!["alice"]);
    }

    #[test]
    fn active_identities_ordered_by_handle() {
        let store = Store::open_in_memory().unwrap();
        for handle in ["zoe", "alice", "mallory"] {
            store.add_identity(handle).unwrap();
        }
        assert_eq!(
            store.active_identities().unwrap(),
            vec!["alice", "mallory", "zoe"]
        );
    }

    #[test]
    fn duplicate_event_insert_reports_already_exists() {
        let store = Store::open_in_memory().unwrap();
        let e = event("alice", ts(10, 0, 0), PresenceState::Online);

        assert_eq!(store.insert_event_if_absent(&e).unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_event_if_absent(&e).unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(store.events_for("alice").len(), 1);
    }

    #[test]
    fn same_timestamp_different_state_is_a_distinct_event() {
        let store = Store::open_in_memory().unwrap();
        let at = ts(10, 0, 0);
        store
            .insert_event_if_absent(&event("alice", at, PresenceState::Online))
            .unwrap();
        let outcome = store
            .insert_event_if_absent(&event("alice", at, PresenceState::Offline))
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(store.events_for("alice").len(), 2);
    }

    #[test]
    fn event_insert_creates_identity_on_first_observation() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_event_if_absent(&event("newcomer", ts(9, 0, 0), PresenceState::Online))
            .unwrap();
        let all = store.list_identities().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].handle, "newcomer");
    }

    #[test]
    fn duplicate_session_insert_reports_already_exists() {
        let store = Store::open_in_memory().unwrap();
        let session = Session {
            identity: "alice".into(),
            started_at: ts(10, 0, 0),
            ended_at: ts(10, 30, 0),
            duration_seconds: 1800,
        };

        assert_eq!(
            store.insert_session_if_absent(&session).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_session_if_absent(&session).unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(store.sessions_for("alice").len(), 1);
    }

    #[test]
    fn recent_sessions_newest_first_with_limit() {
        let store = Store::open_in_memory().unwrap();
        for (start, end) in [(ts(9, 0, 0), ts(9, 10, 0)), (ts(11, 0, 0), ts(11, 5, 0)), (ts(10, 0, 0), ts(10, 20, 0))] {
            store
                .insert_session_if_absent(&Session {
                    identity: "alice".into(),
                    started_at: start,
                    ended_at: end,
                    duration_seconds: (end - start).num_seconds(),
                })
                .unwrap();
        }

        let sessions = store.recent_sessions(2).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].started_at, ts(11, 0, 0));
        assert_eq!(sessions[1].started_at, ts(10, 0, 0));
    }

    #[test]
    fn sessions_round_trip_timestamps() {
        let store = Store::open_in_memory().unwrap();
        let session = Session {
            identity: "alice".into(),
            started_at: ts(10, 0, 0),
            ended_at: ts(10, 0, 20),
            duration_seconds: 20,
        };
        store.insert_session_if_absent(&session).unwrap();

        let loaded = store.recent_sessions(1).unwrap();
        assert_eq!(loaded[0], session);
    }
}
