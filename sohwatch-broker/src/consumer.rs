//! Topic subscriber that fans decoded batches out to registered handlers.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sohwatch_broker::{BrokerClient, Consumer, MemoryBroker};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let broker = MemoryBroker::new();
//! let consumer = Consumer::new(Arc::new(broker.clone()), vec!["soh".to_string()]);
//!
//! consumer.register_handler("soh", |topic, messages| {
//!     println!("{} message(s) on {}", messages.len(), topic);
//! });
//!
//! consumer.start().await;
//! assert!(consumer.connected());
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sohwatch_types::current_timestamp_ms;
use tokio::task::JoinHandle;

use crate::connection::{BrokerClient, BrokerConnection, ConnectionEvent, Connector, EventSink, Role};
use crate::transport::{ConsumerTransport, MessageOffset, RawBatch, RawMessage};
use crate::BrokerError;

/// Pause before polling again after a transport error.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Callback invoked with a topic name and its decoded batch.
///
/// Runs on the consume loop; it must return quickly and do no I/O.
pub type BatchHandler = Arc<dyn Fn(&str, Vec<Value>) + Send + Sync>;

/// Handler invocation prepared from a fully decoded batch.
type Ready = Box<dyn FnOnce() + Send>;

/// Converts a decoded batch for its handler. Fails with the index of the
/// first message that does not convert; nothing runs in that case.
type Dispatch = Arc<dyn Fn(&str, Vec<Value>) -> Result<Ready, (usize, String)> + Send + Sync>;

struct Dispatcher {
    topics: Vec<String>,
    handlers: RwLock<HashMap<String, Dispatch>>,
}

impl Dispatcher {
    async fn handle_batch(
        &self,
        transport: &dyn ConsumerTransport,
        batch: RawBatch,
        events: &EventSink,
    ) {
        if batch.messages.is_empty() {
            return;
        }

        let mut decoded = Vec::with_capacity(batch.messages.len());
        for message in &batch.messages {
            match decode(message) {
                Ok(value) => decoded.push(value),
                Err(e) => return abort_batch(&batch, e, events),
            }
        }
        let count = decoded.len();

        let dispatch = self.handlers.read().get(&batch.topic).cloned();
        let ready = match dispatch {
            Some(dispatch) => match dispatch(&batch.topic, decoded) {
                Ok(ready) => Some(ready),
                Err((index, reason)) => {
                    let offset = batch.messages.get(index).map_or(-1, |m| m.offset);
                    return abort_batch(&batch, BrokerError::Parse { offset, reason }, events);
                }
            },
            None => None,
        };

        let offsets: Vec<MessageOffset> = batch.messages.iter().map(MessageOffset::from).collect();
        if let Err(e) = transport.commit(&batch.topic, &offsets).await {
            tracing::warn!(topic = %batch.topic, error = %e, "Failed to commit consumed offsets");
        }

        events.record(
            &format!("{}.received", events.prefix()),
            format!("Last consumed {} message(s) at {}", count, current_timestamp_ms()),
        );

        match ready {
            Some(ready) => ready(),
            None => {
                tracing::warn!(
                    topic = %batch.topic,
                    count,
                    "No consumer handler registered for topic, dropping batch"
                );
            }
        }
    }
}

/// Nothing from an aborted batch is committed or dispatched.
fn abort_batch(batch: &RawBatch, error: BrokerError, events: &EventSink) {
    events.emit(ConnectionEvent::Error(format!(
        "Failed to consume {} message(s) from {} at {}: {}",
        batch.messages.len(),
        batch.topic,
        current_timestamp_ms(),
        error
    )));
}

fn decode(message: &RawMessage) -> Result<Value, BrokerError> {
    let payload = message.payload.as_deref().ok_or_else(|| BrokerError::Parse {
        offset: message.offset,
        reason: "empty payload".to_string(),
    })?;
    serde_json::from_slice(payload).map_err(|e| BrokerError::Parse {
        offset: message.offset,
        reason: e.to_string(),
    })
}

fn untyped(handler: BatchHandler) -> Dispatch {
    Arc::new(move |topic: &str, values: Vec<Value>| -> Result<Ready, (usize, String)> {
        let handler = Arc::clone(&handler);
        let topic = topic.to_string();
        Ok(Box::new(move || handler(&topic, values)) as Ready)
    })
}

struct ConsumerConnector {
    transport: Arc<dyn ConsumerTransport>,
    dispatcher: Arc<Dispatcher>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connector for ConsumerConnector {
    async fn connect(&self, events: EventSink) -> Result<(), BrokerError> {
        self.transport
            .connect(&self.dispatcher.topics, events.clone())
            .await?;

        let transport = Arc::clone(&self.transport);
        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = tokio::spawn(consume(transport, dispatcher, events));
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.transport.disconnect().await
    }
}

async fn consume(transport: Arc<dyn ConsumerTransport>, dispatcher: Arc<Dispatcher>, events: EventSink) {
    loop {
        match transport.poll().await {
            Ok(Some(batches)) => {
                events.recovered();
                for batch in batches {
                    dispatcher.handle_batch(transport.as_ref(), batch, &events).await;
                }
            }
            Ok(None) => {
                events.emit(ConnectionEvent::Disconnected("consumer stream closed".to_string()));
                break;
            }
            Err(e) => {
                events.emit(ConnectionEvent::Error(e.to_string()));
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Reconnecting topic subscriber.
///
/// Holds at most one handler per topic; registering again replaces the
/// previous handler.
#[derive(Clone)]
pub struct Consumer {
    connection: BrokerConnection,
    dispatcher: Arc<Dispatcher>,
}

impl Consumer {
    /// Create a consumer subscribed to `topics` over `transport`.
    pub fn new(transport: Arc<dyn ConsumerTransport>, topics: Vec<String>) -> Self {
        Self::build(transport, topics, None)
    }

    /// Like [`new`](Self::new) with a non-default reconnect delay.
    pub fn with_retry_delay(
        transport: Arc<dyn ConsumerTransport>,
        topics: Vec<String>,
        retry_delay: Duration,
    ) -> Self {
        Self::build(transport, topics, Some(retry_delay))
    }

    fn build(
        transport: Arc<dyn ConsumerTransport>,
        topics: Vec<String>,
        retry_delay: Option<Duration>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher {
            topics,
            handlers: RwLock::new(HashMap::new()),
        });
        let connector = Arc::new(ConsumerConnector {
            transport,
            dispatcher: Arc::clone(&dispatcher),
            task: Mutex::new(None),
        });
        let connection = match retry_delay {
            Some(delay) => BrokerConnection::with_retry_delay(Role::Consumer, connector, delay),
            None => BrokerConnection::new(Role::Consumer, connector),
        };

        Self {
            connection,
            dispatcher,
        }
    }

    /// Topics this consumer subscribes to.
    pub fn topics(&self) -> &[String] {
        &self.dispatcher.topics
    }

    pub async fn start(&self) {
        self.connection.start().await;
    }

    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    pub async fn reconnect(&self) {
        self.connection.reconnect().await;
    }

    /// Register `handler` for `topic`.
    ///
    /// A topic outside the subscription list is still registered but will
    /// never receive batches; both that and overwriting an existing handler
    /// are logged.
    pub fn register_handler<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&str, Vec<Value>) + Send + Sync + 'static,
    {
        self.register_dispatch(topic, untyped(Arc::new(handler)));
    }

    /// Register one handler for several topics.
    pub fn register_handler_for_topics<F>(&self, topics: &[&str], handler: F)
    where
        F: Fn(&str, Vec<Value>) + Send + Sync + 'static,
    {
        let dispatch = untyped(Arc::new(handler));
        for topic in topics {
            self.register_dispatch(topic, Arc::clone(&dispatch));
        }
    }

    /// Register a handler that receives messages decoded as `M`.
    ///
    /// A message that does not match `M` fails the whole batch the same way
    /// malformed JSON does: nothing is committed or dispatched and the
    /// consumer moves to `Error`.
    pub fn register_typed_handler<M, F>(&self, topic: &str, handler: F)
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(&str, Vec<M>) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.register_dispatch(
            topic,
            Arc::new(move |topic: &str, values: Vec<Value>| -> Result<Ready, (usize, String)> {
                let messages = values
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| serde_json::from_value::<M>(value).map_err(|e| (i, e.to_string())))
                    .collect::<Result<Vec<M>, _>>()?;
                let handler = Arc::clone(&handler);
                let topic = topic.to_string();
                Ok(Box::new(move || handler(&topic, messages)) as Ready)
            }),
        );
    }

    fn register_dispatch(&self, topic: &str, dispatch: Dispatch) {
        if !self.dispatcher.topics.iter().any(|t| t == topic) {
            tracing::warn!(topic, "Registering handler for topic this consumer is not subscribed to");
        }
        let previous = self
            .dispatcher
            .handlers
            .write()
            .insert(topic.to_string(), dispatch);
        if previous.is_some() {
            tracing::warn!(topic, "Replacing existing consumer handler for topic");
        }
    }

    /// Remove the handler for `topic`, if any.
    pub fn unregister_handler(&self, topic: &str) {
        self.dispatcher.handlers.write().remove(topic);
    }

    pub fn has_handler(&self, topic: &str) -> bool {
        self.dispatcher.handlers.read().contains_key(topic)
    }
}

impl BrokerClient for Consumer {
    fn connection(&self) -> &BrokerConnection {
        &self.connection
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("topics", &self.dispatcher.topics)
            .field("status", &self.connection.status())
            .finish()
    }
}
