//! Unix-socket presence provider client.
//!
//! The provider runs as a separate service exposing a newline-delimited
//! JSON query protocol over a Unix domain socket:
//!
//! ```text
//! request:  {"handle":"alice"}
//! response: {"status":"online"}
//!           {"status":"offline","last_seen":"2026-03-01T10:00:00+00:00"}
//!           {"status":"rate_limited","retry_after_ms":30000}
//!           {"status":"error","message":"unknown identity"}
//! ```
//!
//! One connection per query, blocking I/O with timeouts; the sampler drives
//! every call through `spawn_blocking`.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::provider::{PresenceProvider, ProviderError};
use vigil_core::types::{PresenceReading, PresenceState};

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct PresenceQuery<'a> {
    handle: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WireResponse {
    Online,
    Offline { last_seen: Option<String> },
    RateLimited { retry_after_ms: u64 },
    Error { message: String },
}

pub struct SocketProvider {
    socket_path: PathBuf,
    io_timeout: Duration,
}

impl SocketProvider {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeout(socket_path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            io_timeout,
        }
    }
}

/// Parse a raw response line into a reading. Split out of the socket path
/// so it can be unit-tested without a live provider.
fn parse_response(line: &str) -> Result<PresenceReading, ProviderError> {
    let response: WireResponse = serde_json::from_str(line.trim())
        .map_err(|e| ProviderError::Failed(format!("malformed provider response: {e}")))?;

    match response {
        WireResponse::Online => Ok(PresenceReading {
            state: PresenceState::Online,
            last_seen: None,
        }),
        WireResponse::Offline { last_seen } => {
            let last_seen = match last_seen {
                Some(raw) => Some(
                    DateTime::parse_from_rfc3339(&raw)
                        .map_err(|e| {
                            ProviderError::Failed(format!("bad last_seen timestamp: {e}"))
                        })?
                        .with_timezone(&Utc),
                ),
                None => None,
            };
            Ok(PresenceReading {
                state: PresenceState::Offline,
                last_seen,
            })
        }
        WireResponse::RateLimited { retry_after_ms } => Err(ProviderError::RateLimited {
            retry_after: Duration::from_millis(retry_after_ms),
        }),
        WireResponse::Error { message } => Err(ProviderError::Failed(message)),
    }
}

impl PresenceProvider for SocketProvider {
    fn get_presence(&self, handle: &str) -> Result<PresenceReading, ProviderError> {
        let stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;

        let mut writer = stream.try_clone()?;
        let query = serde_json::to_string(&PresenceQuery { handle })
            .map_err(|e| ProviderError::Failed(format!("failed to encode query: {e}")))?;
        writer.write_all(query.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line)?;
        if line.is_empty() {
            return Err(ProviderError::Failed(
                "provider closed the connection without responding".into(),
            ));
        }
        parse_response(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write as _;
    use std::os::unix::net::UnixListener;

    #[test]
    fn parse_online_response() {
        let reading = parse_response(r#"{"status":"online"}"#).expect("should parse");
        assert_eq!(reading.state, PresenceState::Online);
        assert!(reading.last_seen.is_none());
    }

    #[test]
    fn parse_offline_response_with_last_seen() {
        let reading =
            parse_response(r#"{"status":"offline","last_seen":"2026-03-01T10:00:00+00:00"}"#)
                .expect("should parse");
        assert_eq!(reading.state, PresenceState::Offline);
        assert_eq!(
            reading.last_seen,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn parse_offline_response_without_last_seen() {
        let reading = parse_response(r#"{"status":"offline"}"#).expect("should parse");
        assert_eq!(reading.state, PresenceState::Offline);
        assert!(reading.last_seen.is_none());
    }

    #[test]
    fn parse_rate_limited_response() {
        let err = parse_response(r#"{"status":"rate_limited","retry_after_ms":30000}"#)
            .expect_err("rate limit is an error");
        match err {
            ProviderError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_response() {
        let err = parse_response(r#"{"status":"error","message":"unknown identity"}"#)
            .expect_err("provider error is an error");
        match err {
            ProviderError::Failed(message) => assert_eq!(message, "unknown identity"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn parse_malformed_response() {
        assert!(parse_response("not json").is_err());
        assert!(parse_response(r#"{"status":"sleeping"}"#).is_err());
    }

    #[test]
    fn parse_bad_last_seen_timestamp() {
        let err = parse_response(r#"{"status":"offline","last_seen":"yesterday"}"#)
            .expect_err("bad timestamp should fail");
        assert!(err.to_string().contains("last_seen"));
    }

    /// One-shot fake provider service: accepts a single connection, reads
    /// the query line, replies with the canned response.
    fn serve_once(listener: UnixListener, response: &'static str) -> std::thread::JoinHandle<String> {
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept should succeed");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut request = String::new();
            reader.read_line(&mut request).expect("read request");
            let mut stream = stream;
            stream
                .write_all(response.as_bytes())
                .and_then(|_| stream.write_all(b"\n"))
                .expect("write response");
            request
        })
    }

    #[test]
    fn round_trip_over_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("provider.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind");
        let server = serve_once(listener, r#"{"status":"online"}"#);

        let provider = SocketProvider::with_timeout(&socket_path, Duration::from_secs(2));
        let reading = provider.get_presence("alice").expect("query should succeed");
        assert_eq!(reading.state, PresenceState::Online);

        let request = server.join().expect("server thread");
        assert_eq!(request.trim(), r#"{"handle":"alice"}"#);
    }

    #[test]
    fn missing_socket_is_an_io_error() {
        let provider = SocketProvider::new("/nonexistent/provider.sock");
        match provider.get_presence("alice") {
            Err(ProviderError::Io(_)) => {}
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn empty_response_is_a_provider_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("provider.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind");
        // Server that closes the connection without answering.
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).expect("read request");
        });

        let provider = SocketProvider::with_timeout(&socket_path, Duration::from_secs(2));
        let err = provider.get_presence("alice").expect_err("should fail");
        assert!(err.to_string().contains("without responding"));
        server.join().expect("server thread");
    }
}
