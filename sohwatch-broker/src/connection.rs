//! Role-agnostic connection lifecycle shared by the consumer and producer.
//!
//! A [`BrokerConnection`] owns the status, uptime and bounded status history
//! of one broker connection and drives the reconnect loop. What "connect"
//! actually means is supplied by a [`Connector`]; broker-driven events flow
//! back in through an [`EventSink`].

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::status::{ConnectionStatus, HistoryValue, StatusHistory, StatusHistoryEntry};
use crate::BrokerError;

/// Fixed delay between reconnect attempts.
pub const RETRY_BROKER_DELAY: Duration = Duration::from_millis(5000);

/// Which side of the broker a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    Producer,
}

impl Role {
    /// Prefix used for status history ids.
    pub fn prefix(&self) -> &'static str {
        match self {
            Role::Consumer => "consumer",
            Role::Producer => "producer",
        }
    }
}

/// Broker-driven events reported by a transport after connecting.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(String),
    Crashed(String),
    Stopped,
    RequestTimeout(String),
    Heartbeat(String),
    Error(String),
}

/// The connect/disconnect sequence for one role.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish the connection. `events` stays valid for the lifetime of the
    /// connection and may be cloned into background tasks.
    async fn connect(&self, events: EventSink) -> Result<(), BrokerError>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Handle through which transports report events back to their connection.
///
/// Holds only a weak reference, so a transport keeping the sink alive does
/// not keep the connection alive.
#[derive(Clone)]
pub struct EventSink {
    inner: Weak<Inner>,
}

impl EventSink {
    /// Apply a broker-driven event to the owning connection.
    pub fn emit(&self, event: ConnectionEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_event(event);
        }
    }

    /// Mark the connection connected again after broker traffic succeeded
    /// while it was in `Disconnected`, `Error` or `Crashed`.
    pub fn recovered(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let failed = matches!(
                inner.state.lock().status,
                ConnectionStatus::Disconnected | ConnectionStatus::Error | ConnectionStatus::Crashed
            );
            if failed {
                inner.apply_event(ConnectionEvent::Connected);
            }
        }
    }

    /// Append a history entry without touching status.
    pub fn record(&self, id: &str, value: impl Into<HistoryValue>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.state.lock().history.record(id, value);
        }
    }

    /// Prefix of the owning connection's history ids.
    pub fn prefix(&self) -> &'static str {
        self.inner
            .upgrade()
            .map(|inner| inner.role.prefix())
            .unwrap_or("detached")
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &(self.inner.strong_count() > 0))
            .finish()
    }
}

struct ConnectionState {
    status: ConnectionStatus,
    up_time: Option<SystemTime>,
    history: StatusHistory,
    reconnect: Option<JoinHandle<()>>,
}

impl ConnectionState {
    fn set_status(&mut self, status: ConnectionStatus) {
        if status == ConnectionStatus::Connected {
            if self.status != ConnectionStatus::Connected || self.up_time.is_none() {
                self.up_time = Some(SystemTime::now());
            }
        } else {
            self.up_time = None;
        }
        self.status = status;
    }

    fn cancel_reconnect(&mut self) {
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }

    fn reconnect_pending(&self) -> bool {
        self.reconnect
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

struct Inner {
    role: Role,
    retry_delay: Duration,
    connector: Arc<dyn Connector>,
    state: Mutex<ConnectionState>,
}

enum Attempt {
    Connected,
    Retry,
    Cancelled,
}

impl Inner {
    fn id(&self, suffix: &str) -> String {
        format!("{}.{}", self.role.prefix(), suffix)
    }

    fn transition(&self, suffix: &str, status: ConnectionStatus) {
        let mut state = self.state.lock();
        state.set_status(status);
        state.history.record(self.id(suffix), status);
    }

    fn apply_event(&self, event: ConnectionEvent) {
        let prefix = self.role.prefix();
        let mut state = self.state.lock();

        let (suffix, status, value): (&str, Option<ConnectionStatus>, HistoryValue) = match event {
            ConnectionEvent::Connected => {
                tracing::info!(role = prefix, "Broker connection established");
                ("connect", Some(ConnectionStatus::Connected), ConnectionStatus::Connected.into())
            }
            ConnectionEvent::Disconnected(info) => {
                tracing::warn!(role = prefix, %info, "Broker disconnected");
                ("disconnect", Some(ConnectionStatus::Disconnected), info.into())
            }
            ConnectionEvent::Crashed(reason) => {
                tracing::error!(role = prefix, %reason, "Broker client crashed");
                ("crash", Some(ConnectionStatus::Crashed), HistoryValue::Error(reason))
            }
            ConnectionEvent::Stopped => {
                tracing::info!(role = prefix, "Broker client stopped");
                ("stop", Some(ConnectionStatus::Stopped), ConnectionStatus::Stopped.into())
            }
            ConnectionEvent::RequestTimeout(info) => {
                tracing::warn!(role = prefix, %info, "Broker request timed out");
                ("request_timeout", None, info.into())
            }
            ConnectionEvent::Heartbeat(info) => ("heartbeat", None, info.into()),
            ConnectionEvent::Error(reason) => {
                tracing::error!(role = prefix, %reason, "Broker client error");
                ("error", Some(ConnectionStatus::Error), HistoryValue::Error(reason))
            }
        };

        if let Some(status) = status {
            // An explicit stop is final for this session.
            if state.status == ConnectionStatus::Stopped {
                state.history.record(self.id(suffix), value);
                return;
            }
            if status == ConnectionStatus::Stopped {
                state.cancel_reconnect();
            }
            state.set_status(status);
        }
        state.history.record(self.id(suffix), value);
    }
}

/// One broker connection's lifecycle: status, uptime, history and reconnects.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<Inner>,
}

impl BrokerConnection {
    /// Create a connection in `NotInitialized` state.
    pub fn new(role: Role, connector: Arc<dyn Connector>) -> Self {
        Self::with_retry_delay(role, connector, RETRY_BROKER_DELAY)
    }

    /// Create a connection with a non-default reconnect delay.
    pub fn with_retry_delay(role: Role, connector: Arc<dyn Connector>, retry_delay: Duration) -> Self {
        let mut history = StatusHistory::default();
        history.record(
            format!("{}.not.initialized", role.prefix()),
            ConnectionStatus::NotInitialized,
        );

        Self {
            inner: Arc::new(Inner {
                role,
                retry_delay,
                connector,
                state: Mutex::new(ConnectionState {
                    status: ConnectionStatus::NotInitialized,
                    up_time: None,
                    history,
                    reconnect: None,
                }),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Start the connection.
    ///
    /// Only valid from `NotInitialized`. A failed connect leaves the
    /// connection `Reconnecting` with a retry scheduled every
    /// [`RETRY_BROKER_DELAY`] until it succeeds or [`stop`](Self::stop) is
    /// called. Connection failures never surface as errors here.
    pub async fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.status != ConnectionStatus::NotInitialized {
                tracing::warn!(
                    role = self.inner.role.prefix(),
                    status = %state.status,
                    "Broker connection already started"
                );
                return;
            }
            state.set_status(ConnectionStatus::Connecting);
            state
                .history
                .record(self.inner.id("connecting"), ConnectionStatus::Connecting);
        }

        tracing::info!(role = self.inner.role.prefix(), "Starting broker connection");
        if let Attempt::Retry = attempt_connect(&self.inner).await {
            schedule_reconnect(&self.inner);
        }
    }

    /// Re-enter `Connecting` after a broker-driven `Disconnected`, `Error` or
    /// `Crashed`. Ignored in any other state.
    pub async fn reconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            match state.status {
                ConnectionStatus::Disconnected | ConnectionStatus::Error | ConnectionStatus::Crashed => {}
                other => {
                    tracing::debug!(role = self.inner.role.prefix(), status = %other, "Reconnect ignored");
                    return;
                }
            }
            state.cancel_reconnect();
            state.set_status(ConnectionStatus::Connecting);
            state
                .history
                .record(self.inner.id("connecting"), ConnectionStatus::Connecting);
        }

        if let Attempt::Retry = attempt_connect(&self.inner).await {
            schedule_reconnect(&self.inner);
        }
    }

    /// Cancel any pending reconnect, mark the connection `Stopped` and
    /// disconnect. Disconnect failures are logged.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.cancel_reconnect();
            state.set_status(ConnectionStatus::Stopped);
            state
                .history
                .record(self.inner.id("stopped"), ConnectionStatus::Stopped);
        }

        tracing::info!(role = self.inner.role.prefix(), "Stopping broker connection");
        if let Err(e) = self.inner.connector.disconnect().await {
            tracing::error!(role = self.inner.role.prefix(), error = %e, "Failed to disconnect");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// True iff the status is `Connected`.
    pub fn connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// When the connection last entered `Connected`; `None` while not connected.
    pub fn up_time(&self) -> Option<SystemTime> {
        self.inner.state.lock().up_time
    }

    /// Seconds since the connection entered `Connected`, or 0.
    pub fn up_time_seconds(&self) -> f64 {
        self.up_time()
            .and_then(|since| SystemTime::now().duration_since(since).ok())
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Set the status directly, e.g. after a successful or failed send.
    pub fn update_status(&self, status: ConnectionStatus) {
        let mut state = self.inner.state.lock();
        if state.status == ConnectionStatus::Stopped {
            return;
        }
        state.set_status(status);
    }

    /// Append an entry to the status history.
    pub fn record_status_history(&self, id: impl Into<String>, value: impl Into<HistoryValue>) {
        self.inner.state.lock().history.record(id, value);
    }

    /// Status history, newest first.
    pub fn status_history(&self) -> Vec<StatusHistoryEntry> {
        self.inner.state.lock().history.newest_first()
    }

    /// A sink bound to this connection.
    pub fn event_sink(&self) -> EventSink {
        EventSink {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("role", &self.inner.role)
            .field("status", &self.status())
            .finish()
    }
}

async fn attempt_connect(inner: &Arc<Inner>) -> Attempt {
    let sink = EventSink {
        inner: Arc::downgrade(inner),
    };

    match inner.connector.connect(sink).await {
        Ok(()) => {
            let stopped = inner.state.lock().status == ConnectionStatus::Stopped;
            if stopped {
                // stop() raced the connect; undo it.
                if let Err(e) = inner.connector.disconnect().await {
                    tracing::error!(role = inner.role.prefix(), error = %e, "Failed to disconnect");
                }
                return Attempt::Cancelled;
            }
            inner.transition("started", ConnectionStatus::Started);
            inner.transition("connected", ConnectionStatus::Connected);
            tracing::info!(role = inner.role.prefix(), "Connected to broker");
            Attempt::Connected
        }
        Err(e) => {
            let mut state = inner.state.lock();
            if state.status == ConnectionStatus::Stopped {
                return Attempt::Cancelled;
            }
            tracing::warn!(
                role = inner.role.prefix(),
                error = %e,
                "Connection to broker failed, retrying..."
            );
            state.set_status(ConnectionStatus::Reconnecting);
            state
                .history
                .record(inner.id("error"), HistoryValue::Error(e.to_string()));
            Attempt::Retry
        }
    }
}

fn schedule_reconnect(inner: &Arc<Inner>) {
    let mut state = inner.state.lock();
    if state.status == ConnectionStatus::Stopped || state.reconnect_pending() {
        return;
    }

    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(task_inner.retry_delay).await;
            {
                let mut state = task_inner.state.lock();
                if state.status != ConnectionStatus::Reconnecting {
                    break;
                }
                state.set_status(ConnectionStatus::Connecting);
                state
                    .history
                    .record(task_inner.id("connecting"), ConnectionStatus::Connecting);
            }
            match attempt_connect(&task_inner).await {
                Attempt::Retry => continue,
                Attempt::Connected | Attempt::Cancelled => break,
            }
        }
    });
    state.reconnect = Some(handle);
}

/// Health accessors for anything built on a [`BrokerConnection`].
pub trait BrokerClient {
    fn connection(&self) -> &BrokerConnection;

    fn status(&self) -> ConnectionStatus {
        self.connection().status()
    }

    fn connected(&self) -> bool {
        self.connection().connected()
    }

    fn up_time_seconds(&self) -> f64 {
        self.connection().up_time_seconds()
    }

    fn status_history(&self) -> Vec<StatusHistoryEntry> {
        self.connection().status_history()
    }
}

impl BrokerClient for BrokerConnection {
    fn connection(&self) -> &BrokerConnection {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::HISTORY_SIZE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedConnector {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl ScriptedConnector {
        fn failing(times: usize) -> Arc<Self> {
            let connector = Self::default();
            connector.failures_left.store(times, Ordering::SeqCst);
            Arc::new(connector)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _events: EventSink) -> Result<(), BrokerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BrokerError::Connection("broker unavailable".to_string()));
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), BrokerError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ids(conn: &BrokerConnection) -> Vec<String> {
        conn.status_history().into_iter().rev().map(|e| e.id).collect()
    }

    #[tokio::test]
    async fn start_walks_through_started_to_connected() {
        let connector = ScriptedConnector::failing(0);
        let conn = BrokerConnection::new(Role::Consumer, connector.clone());
        assert_eq!(conn.status(), ConnectionStatus::NotInitialized);
        assert!(conn.up_time().is_none());

        conn.start().await;

        assert!(conn.connected());
        assert!(conn.up_time().is_some());
        assert_eq!(
            ids(&conn),
            vec![
                "consumer.not.initialized",
                "consumer.connecting",
                "consumer.started",
                "consumer.connected"
            ]
        );
    }

    #[tokio::test]
    async fn start_twice_is_a_noop() {
        let connector = ScriptedConnector::failing(0);
        let conn = BrokerConnection::new(Role::Producer, connector.clone());
        conn.start().await;
        conn.start().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_retries_once_after_delay() {
        let connector = ScriptedConnector::failing(1);
        let conn = BrokerConnection::new(Role::Consumer, connector.clone());

        conn.start().await;
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(RETRY_BROKER_DELAY - Duration::from_millis(1)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert!(conn.connected());

        // No further attempts once connected.
        tokio::time::sleep(RETRY_BROKER_DELAY * 3).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_unbounded() {
        let connector = ScriptedConnector::failing(4);
        let conn = BrokerConnection::new(Role::Producer, connector.clone());

        conn.start().await;
        tokio::time::sleep(RETRY_BROKER_DELAY * 4 + Duration::from_millis(10)).await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 5);
        assert!(conn.connected());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_reconnecting_cancels_retry() {
        let connector = ScriptedConnector::failing(10);
        let conn = BrokerConnection::new(Role::Consumer, connector.clone());

        conn.start().await;
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);

        conn.stop().await;
        assert_eq!(conn.status(), ConnectionStatus::Stopped);

        tokio::time::sleep(RETRY_BROKER_DELAY * 2).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn uptime_cleared_when_leaving_connected() {
        let conn = BrokerConnection::new(Role::Consumer, ScriptedConnector::failing(0));
        conn.start().await;
        assert!(conn.up_time().is_some());

        conn.event_sink()
            .emit(ConnectionEvent::Disconnected("broker went away".to_string()));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(conn.up_time().is_none());
        assert_eq!(conn.up_time_seconds(), 0.0);
    }

    #[tokio::test]
    async fn heartbeat_only_records_history() {
        let conn = BrokerConnection::new(Role::Consumer, ScriptedConnector::failing(0));
        conn.start().await;

        conn.event_sink()
            .emit(ConnectionEvent::Heartbeat("group=soh".to_string()));

        assert!(conn.connected());
        assert_eq!(conn.status_history()[0].id, "consumer.heartbeat");
    }

    #[tokio::test]
    async fn events_after_stop_keep_stopped() {
        let conn = BrokerConnection::new(Role::Producer, ScriptedConnector::failing(0));
        conn.start().await;
        conn.stop().await;

        conn.event_sink().emit(ConnectionEvent::Connected);
        assert_eq!(conn.status(), ConnectionStatus::Stopped);
    }

    #[tokio::test]
    async fn reconnect_recovers_from_error() {
        let connector = ScriptedConnector::failing(0);
        let conn = BrokerConnection::new(Role::Consumer, connector.clone());
        conn.start().await;

        conn.event_sink()
            .emit(ConnectionEvent::Error("broker transport failure".to_string()));
        assert_eq!(conn.status(), ConnectionStatus::Error);

        conn.reconnect().await;
        assert!(conn.connected());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn traffic_after_error_restores_connected() {
        let connector = ScriptedConnector::failing(0);
        let conn = BrokerConnection::new(Role::Consumer, connector.clone());
        conn.start().await;
        let events = conn.event_sink();

        events.emit(ConnectionEvent::Error("fetch failed".to_string()));
        assert!(!conn.connected());
        assert_eq!(conn.up_time_seconds(), 0.0);

        events.recovered();
        assert_eq!(conn.status(), ConnectionStatus::Connected);
        assert_eq!(conn.status_history()[0].id, "consumer.connect");
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovered_leaves_stopped_and_connected_alone() {
        let conn = BrokerConnection::new(Role::Producer, ScriptedConnector::failing(0));
        conn.start().await;
        let events = conn.event_sink();
        let entries = conn.status_history().len();

        events.recovered();
        assert_eq!(conn.status_history().len(), entries);

        conn.stop().await;
        events.recovered();
        assert_eq!(conn.status(), ConnectionStatus::Stopped);
    }

    #[tokio::test]
    async fn reconnect_ignored_when_connected() {
        let connector = ScriptedConnector::failing(0);
        let conn = BrokerConnection::new(Role::Consumer, connector.clone());
        conn.start().await;
        conn.reconnect().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn history_is_bounded_newest_first() {
        let conn = BrokerConnection::new(Role::Consumer, ScriptedConnector::failing(0));
        for i in 0..25 {
            conn.record_status_history(format!("event.{}", i), "tick");
        }

        let history = conn.status_history();
        assert_eq!(history.len(), HISTORY_SIZE);
        assert_eq!(history[0].id, "event.24");
        assert_eq!(history[HISTORY_SIZE - 1].id, "event.5");
    }
}
