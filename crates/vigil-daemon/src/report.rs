//! Plain-text session listing for `vigil sessions`.

use vigil_core::types::Session;

/// Render whole seconds as `2h 03m 20s`, dropping leading zero units.
fn format_duration(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {secs:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

/// Format the full output for `vigil sessions`.
///
/// Example output:
/// ```text
/// Recent sessions
/// ─────────────────────────────────────────────────────────────
/// alice  2026-03-01 09:12:04 → 2026-03-01 09:40:12   28m 08s
/// bob    2026-03-01 08:00:00 → 2026-03-01 08:23:05   23m 05s
///
/// 2 sessions, 51m 13s online
/// ```
pub fn format_sessions(sessions: &[Session]) -> String {
    let mut out = String::new();

    out.push_str("Recent sessions\n");
    out.push_str("─────────────────────────────────────────────────────────────\n");

    if sessions.is_empty() {
        out.push_str("  No sessions recorded.\n");
        return out;
    }

    let handle_width = sessions
        .iter()
        .map(|s| s.identity.len())
        .max()
        .unwrap_or(0);

    for session in sessions {
        out.push_str(&format!(
            "{:<width$}  {} → {}   {}\n",
            session.identity,
            session.started_at.format("%Y-%m-%d %H:%M:%S"),
            session.ended_at.format("%Y-%m-%d %H:%M:%S"),
            format_duration(session.duration_seconds),
            width = handle_width,
        ));
    }

    let total: i64 = sessions.iter().map(|s| s.duration_seconds).sum();
    out.push('\n');
    out.push_str(&format!(
        "{} session{}, {} online\n",
        sessions.len(),
        if sessions.len() == 1 { "" } else { "s" },
        format_duration(total),
    ));

    out
}
