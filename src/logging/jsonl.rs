//! JSONL (JSON Lines) audit records
//!
//! One JSON object per line, one line per connection lifecycle event or auth decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

/// Audit event kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogEventKind {
    /// Listener bound
    ServerStart,
    /// Listener closed
    ServerStop,
    /// TCP connection accepted
    ConnectionOpen,
    /// Connection fully torn down
    ConnectionClose,
    /// Policy verdict for one auth attempt
    AuthDecision,
    /// Session channel accepted
    ChannelOpen,
    /// Channel-open request refused
    ChannelDenied,
    /// A connection ended with an error; `reason` holds the error kind
    Error,
}

impl std::fmt::Display for LogEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogEventKind::ServerStart => write!(f, "server_start"),
            LogEventKind::ServerStop => write!(f, "server_stop"),
            LogEventKind::ConnectionOpen => write!(f, "connection_open"),
            LogEventKind::ConnectionClose => write!(f, "connection_close"),
            LogEventKind::AuthDecision => write!(f, "auth_decision"),
            LogEventKind::ChannelOpen => write!(f, "channel_open"),
            LogEventKind::ChannelDenied => write!(f, "channel_denied"),
            LogEventKind::Error => write!(f, "error"),
        }
    }
}

/// A structured audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub kind: LogEventKind,

    /// Listen address (server events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Per-process connection id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<u64>,

    /// Remote address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Auth method name ("none", "password", "publickey")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// SSH key fingerprint (SHA256 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Verdict name ("accepted", "rejected", "accepted_partial")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,

    /// Channel kind for channel events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_kind: Option<String>,

    /// Connection state at close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_echoed: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEvent {
    /// Create a new log event with the current timestamp
    pub fn new(kind: LogEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            listen: None,
            conn_id: None,
            peer: None,
            user: None,
            method: None,
            fingerprint: None,
            verdict: None,
            channel_kind: None,
            state: None,
            bytes_echoed: None,
            duration_ms: None,
            reason: None,
            error: None,
        }
    }

    pub fn with_listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr.to_string());
        self
    }

    /// Set connection id and peer address together
    pub fn with_connection(mut self, conn_id: u64, peer: SocketAddr) -> Self {
        self.conn_id = Some(conn_id);
        self.peer = Some(peer.to_string());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.fingerprint = Some(fp.into());
        self
    }

    pub fn with_verdict(mut self, verdict: impl Into<String>) -> Self {
        self.verdict = Some(verdict.into());
        self
    }

    pub fn with_channel_kind(mut self, kind: impl Into<String>) -> Self {
        self.channel_kind = Some(kind.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_bytes_echoed(mut self, bytes: u64) -> Self {
        self.bytes_echoed = Some(bytes);
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn server_start(listen: SocketAddr) -> Self {
        Self::new(LogEventKind::ServerStart).with_listen(listen)
    }

    pub fn server_stop(listen: SocketAddr) -> Self {
        Self::new(LogEventKind::ServerStop).with_listen(listen)
    }

    pub fn connection_open(conn_id: u64, peer: SocketAddr) -> Self {
        Self::new(LogEventKind::ConnectionOpen).with_connection(conn_id, peer)
    }

    pub fn connection_close(conn_id: u64, peer: SocketAddr, state: impl Into<String>) -> Self {
        Self::new(LogEventKind::ConnectionClose)
            .with_connection(conn_id, peer)
            .with_state(state)
    }

    pub fn auth_decision(
        conn_id: u64,
        peer: SocketAddr,
        user: impl Into<String>,
        method: impl Into<String>,
        verdict: impl Into<String>,
    ) -> Self {
        Self::new(LogEventKind::AuthDecision)
            .with_connection(conn_id, peer)
            .with_user(user)
            .with_method(method)
            .with_verdict(verdict)
    }

    pub fn channel_open(conn_id: u64, peer: SocketAddr, kind: impl Into<String>) -> Self {
        Self::new(LogEventKind::ChannelOpen)
            .with_connection(conn_id, peer)
            .with_channel_kind(kind)
    }

    pub fn channel_denied(conn_id: u64, peer: SocketAddr, kind: impl Into<String>) -> Self {
        Self::new(LogEventKind::ChannelDenied)
            .with_connection(conn_id, peer)
            .with_channel_kind(kind)
    }

    pub fn connection_error(
        conn_id: u64,
        peer: SocketAddr,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(LogEventKind::Error)
            .with_connection(conn_id, peer)
            .with_reason(kind)
            .with_error(message)
    }

    /// Serialize the event to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSONL file writer with thread-safe buffered output
pub struct JsonlWriter {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlWriter {
    /// Open `path` for appending, creating it (and its parent directory) if needed
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Write a log event to the file
    pub fn write(&self, event: &LogEvent) -> std::io::Result<()> {
        let json = event
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Flush any buffered data to the file
    pub fn flush(&self) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writer.flush()
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use tempfile::NamedTempFile;

    fn peer() -> SocketAddr {
        "127.0.0.1:50022".parse().unwrap()
    }

    #[test]
    fn test_log_event_new() {
        let event = LogEvent::new(LogEventKind::ServerStart);
        assert_eq!(event.kind, LogEventKind::ServerStart);
        assert!(event.peer.is_none());
    }

    #[test]
    fn test_auth_decision_fields() {
        let event = LogEvent::auth_decision(7, peer(), "alice", "publickey", "accepted")
            .with_fingerprint("SHA256:abc123");

        assert_eq!(event.kind, LogEventKind::AuthDecision);
        assert_eq!(event.conn_id, Some(7));
        assert_eq!(event.peer.as_deref(), Some("127.0.0.1:50022"));
        assert_eq!(event.user.as_deref(), Some("alice"));
        assert_eq!(event.verdict.as_deref(), Some("accepted"));
        assert_eq!(event.fingerprint.as_deref(), Some("SHA256:abc123"));
    }

    #[test]
    fn test_log_event_serialize_skips_empty_fields() {
        let event = LogEvent::connection_open(1, peer());
        let json = event.to_json().unwrap();

        assert!(json.contains("\"kind\":\"connection_open\""));
        assert!(json.contains("\"peer\":\"127.0.0.1:50022\""));
        assert!(json.contains("\"timestamp\":"));
        assert!(!json.contains("\"user\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_jsonl_writer() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        {
            let writer = JsonlWriter::new(&path).unwrap();
            writer
                .write(&LogEvent::server_start("0.0.0.0:2222".parse().unwrap()))
                .unwrap();
            writer
                .write(&LogEvent::connection_close(1, peer(), "closed").with_bytes_echoed(4))
                .unwrap();
        }

        let file = File::open(&path).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map(|l| l.unwrap()).collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"kind\":\"server_start\""));
        assert!(lines[1].contains("\"kind\":\"connection_close\""));
        assert!(lines[1].contains("\"bytes_echoed\":4"));
    }

    #[test]
    fn test_jsonl_writer_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let writer = JsonlWriter::new(&path).unwrap();
        writer
            .write(&LogEvent::connection_error(1, peer(), "io", "boom"))
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_connection_error_fields() {
        let event = LogEvent::connection_error(9, peer(), "negotiation", "handshake timed out");
        assert_eq!(event.kind, LogEventKind::Error);
        assert_eq!(event.conn_id, Some(9));
        assert_eq!(event.reason.as_deref(), Some("negotiation"));
        assert_eq!(event.error.as_deref(), Some("handshake timed out"));

        let json = event.to_json().unwrap();
        assert!(json.contains("\"kind\":\"error\""));
    }

    #[test]
    fn test_log_event_kind_display() {
        assert_eq!(LogEventKind::ConnectionOpen.to_string(), "connection_open");
        assert_eq!(LogEventKind::AuthDecision.to_string(), "auth_decision");
        assert_eq!(LogEventKind::ChannelDenied.to_string(), "channel_denied");
    }

    #[test]
    fn test_log_event_deserialize() {
        let event = LogEvent::channel_denied(3, peer(), "direct-tcpip")
            .with_reason("administratively prohibited");

        let json = event.to_json().unwrap();
        let parsed: LogEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.kind, LogEventKind::ChannelDenied);
        assert_eq!(parsed.channel_kind.as_deref(), Some("direct-tcpip"));
        assert_eq!(parsed.reason.as_deref(), Some("administratively prohibited"));
    }
}
