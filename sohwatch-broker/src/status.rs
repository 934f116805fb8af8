//! Connection status and the bounded status history.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use sohwatch_types::current_timestamp_ms;

/// Number of history entries kept per connection.
pub const HISTORY_SIZE: usize = 20;

/// Lifecycle state of one broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    NotInitialized,
    Connecting,
    Reconnecting,
    Started,
    Connected,
    Stopped,
    Disconnected,
    Error,
    Crashed,
}

impl ConnectionStatus {
    /// Label used in history entries and health output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::NotInitialized => "NOT_INITIALIZED",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Reconnecting => "RECONNECTING",
            ConnectionStatus::Started => "STARTED",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Stopped => "STOPPED",
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::Error => "ERROR",
            ConnectionStatus::Crashed => "CRASHED",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a history entry recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum HistoryValue {
    Status(ConnectionStatus),
    Info(String),
    Error(String),
}

impl fmt::Display for HistoryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryValue::Status(status) => write!(f, "{}", status),
            HistoryValue::Info(info) => f.write_str(info),
            HistoryValue::Error(err) => write!(f, "Error: {}", err),
        }
    }
}

impl From<ConnectionStatus> for HistoryValue {
    fn from(status: ConnectionStatus) -> Self {
        HistoryValue::Status(status)
    }
}

impl From<String> for HistoryValue {
    fn from(info: String) -> Self {
        HistoryValue::Info(info)
    }
}

impl From<&str> for HistoryValue {
    fn from(info: &str) -> Self {
        HistoryValue::Info(info.to_string())
    }
}

/// One recorded status transition or event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub id: String,
    pub value: HistoryValue,
    pub timestamp_ms: u64,
}

/// Fixed-capacity ring of status history, oldest evicted first.
///
/// Diagnostics only; nothing reads it for correctness.
#[derive(Debug, Clone)]
pub struct StatusHistory {
    entries: VecDeque<StatusHistoryEntry>,
    capacity: usize,
}

impl Default for StatusHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_SIZE)
    }
}

impl StatusHistory {
    /// Create an empty history holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn record(&mut self, id: impl Into<String>, value: impl Into<HistoryValue>) {
        self.entries.push_back(StatusHistoryEntry {
            id: id.into(),
            value: value.into(),
            timestamp_ms: current_timestamp_ms(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Entries newest first.
    pub fn newest_first(&self) -> Vec<StatusHistoryEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
