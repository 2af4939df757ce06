//! Observer-facing notifications.
//!
//! The bridge reports everything an attached UI needs through an injected
//! [`EventSink`]: connection status changes, human-readable log entries and one
//! structured [`HttpLogRecord`] per delivery attempt. Publishing never blocks and
//! never fails; with no observer attached events are simply discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Serial link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Category of a log entry as shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Info,
    Success,
    Error,
    Http,
    /// Raw device text, diagnostic only.
    Data,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogType::Info => "info",
            LogType::Success => "success",
            LogType::Error => "error",
            LogType::Http => "http",
            LogType::Data => "data",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: LogType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(kind: LogType, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Audit record produced once per delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpLogRecord {
    /// Response status, or 0 when no response was received.
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything an observer can receive, for sinks that forward over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum BridgeEvent {
    Status(StatusEvent),
    Log(LogEntry),
    HttpLog(HttpLogRecord),
}

/// Notification boundary implemented by the host (UI, IPC, CLI).
pub trait EventSink: Send + Sync {
    fn publish_status(&self, state: ConnectionState, detail: Option<String>);
    fn publish_log(&self, entry: LogEntry);
    fn publish_http_log(&self, record: HttpLogRecord);

    fn log(&self, kind: LogType, message: &str) {
        self.publish_log(LogEntry::new(kind, message));
    }
}

/// Forwards events into an unbounded channel. Send failures (receiver gone)
/// are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish_status(&self, state: ConnectionState, detail: Option<String>) {
        let _ = self.tx.send(BridgeEvent::Status(StatusEvent { state, detail }));
    }

    fn publish_log(&self, entry: LogEntry) {
        let _ = self.tx.send(BridgeEvent::Log(entry));
    }

    fn publish_http_log(&self, record: HttpLogRecord) {
        let _ = self.tx.send(BridgeEvent::HttpLog(record));
    }
}

/// Writes observer events to the process log. Used by the CLI host.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish_status(&self, state: ConnectionState, detail: Option<String>) {
        match detail {
            Some(d) => log::info!("status: {} ({})", state, d),
            None => log::info!("status: {}", state),
        }
    }

    fn publish_log(&self, entry: LogEntry) {
        match entry.kind {
            LogType::Error => log::warn!("[{}] {}", entry.kind, entry.message),
            LogType::Data => log::debug!(
                "[{}] {}",
                entry.kind,
                crate::logutil::escape_log(&entry.message)
            ),
            _ => log::info!("[{}] {}", entry.kind, entry.message),
        }
    }

    fn publish_http_log(&self, record: HttpLogRecord) {
        match record.error {
            Some(ref err) => log::debug!("http {} {} error={}", record.code, record.message, err),
            None => log::debug!("http {} {}", record.code, record.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.log(LogType::Info, "nobody listening");
        sink.publish_status(ConnectionState::Connected, None);
    }

    #[test]
    fn log_entry_serializes_type_field() {
        let entry = LogEntry::new(LogType::Success, "ok");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["message"], "ok");
        assert!(json["id"].is_string());
    }

    #[test]
    fn status_event_omits_empty_detail() {
        let ev = BridgeEvent::Status(StatusEvent {
            state: ConnectionState::Disconnected,
            detail: None,
        });
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(
            json,
            r#"{"event":"status","payload":{"state":"disconnected"}}"#
        );
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.publish_status(ConnectionState::Connecting, Some("/dev/ttyS0".into()));
        sink.log(LogType::Error, "boom");
        match rx.recv().await.unwrap() {
            BridgeEvent::Status(s) => assert_eq!(s.state, ConnectionState::Connecting),
            other => panic!("unexpected {:?}", other),
        }
        match rx.recv().await.unwrap() {
            BridgeEvent::Log(l) => {
                assert_eq!(l.kind, LogType::Error);
                assert_eq!(l.message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
