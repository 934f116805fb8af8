//! In-process broker transport.
//!
//! Implements both transport traits against shared memory so the consumer,
//! producer and everything built on them can run without a Kafka cluster.
//! Anything sent through the producer side is also queued for consumers
//! subscribed to the same topic.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::transport::{
    Compression, ConsumerTransport, MessageOffset, ProducerTransport, RawBatch, RawMessage,
};
use crate::{BrokerError, EventSink};

#[derive(Default)]
struct State {
    consumer_connected: bool,
    subscriptions: Vec<String>,
    queue: VecDeque<RawBatch>,
    next_offset: HashMap<String, i64>,
    committed: HashMap<String, Vec<MessageOffset>>,
    sent: HashMap<String, Vec<Vec<u8>>>,
    connect_failures: usize,
    send_failures: usize,
    connect_attempts: usize,
    closed: bool,
}

impl State {
    fn enqueue(&mut self, topic: &str, payloads: Vec<Vec<u8>>) {
        let next = self.next_offset.entry(topic.to_string()).or_insert(0);
        let messages = payloads
            .into_iter()
            .map(|payload| {
                let offset = *next;
                *next += 1;
                RawMessage {
                    partition: 0,
                    offset,
                    payload: Some(payload),
                }
            })
            .collect();
        self.queue.push_back(RawBatch {
            topic: topic.to_string(),
            messages,
        });
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.state.lock().connect_failures = n;
    }

    /// Make the next `n` sends fail.
    pub fn fail_next_sends(&self, n: usize) {
        self.shared.state.lock().send_failures = n;
    }

    /// Number of connect calls seen so far, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.shared.state.lock().connect_attempts
    }

    /// Queue one batch of raw payloads on `topic`.
    pub fn publish(&self, topic: &str, payloads: Vec<Vec<u8>>) {
        self.shared.state.lock().enqueue(topic, payloads);
        self.shared.notify.notify_one();
    }

    /// Queue one batch of JSON-serialized messages on `topic`.
    pub fn publish_json<T: Serialize>(&self, topic: &str, messages: &[T]) -> Result<(), BrokerError> {
        let payloads = messages
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;
        self.publish(topic, payloads);
        Ok(())
    }

    /// Offsets committed on `topic`, in commit order.
    pub fn committed(&self, topic: &str) -> Vec<MessageOffset> {
        self.shared
            .state
            .lock()
            .committed
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Payloads produced on `topic`, in send order.
    pub fn sent(&self, topic: &str) -> Vec<Vec<u8>> {
        self.shared
            .state
            .lock()
            .sent
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// End the consumer stream.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_one();
    }

    fn take_connect_failure(state: &mut State) -> Result<(), BrokerError> {
        state.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(BrokerError::Connection("memory broker refused connection".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MemoryBroker")
            .field("subscriptions", &state.subscriptions)
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[async_trait]
impl ConsumerTransport for MemoryBroker {
    async fn connect(&self, topics: &[String], _events: EventSink) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock();
        Self::take_connect_failure(&mut state)?;
        state.consumer_connected = true;
        state.subscriptions = topics.to_vec();
        Ok(())
    }

    async fn poll(&self) -> Result<Option<Vec<RawBatch>>, BrokerError> {
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Ok(None);
                }
                if !state.consumer_connected {
                    return Err(BrokerError::NotConnected);
                }
                if !state.queue.is_empty() {
                    let drained: Vec<RawBatch> = state.queue.drain(..).collect();
                    let batches = drained
                        .into_iter()
                        .filter(|batch| state.subscriptions.contains(&batch.topic))
                        .collect::<Vec<_>>();
                    if !batches.is_empty() {
                        return Ok(Some(batches));
                    }
                }
            }
            self.shared.notify.notified().await;
        }
    }

    async fn commit(&self, topic: &str, offsets: &[MessageOffset]) -> Result<(), BrokerError> {
        self.shared
            .state
            .lock()
            .committed
            .entry(topic.to_string())
            .or_default()
            .extend_from_slice(offsets);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.shared.state.lock().consumer_connected = false;
        Ok(())
    }
}

#[async_trait]
impl ProducerTransport for MemoryBroker {
    async fn connect(&self, _events: EventSink) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock();
        Self::take_connect_failure(&mut state)
    }

    async fn send(
        &self,
        topic: &str,
        payloads: Vec<Vec<u8>>,
        _compression: Compression,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock();
            if state.send_failures > 0 {
                state.send_failures -= 1;
                return Err(BrokerError::Send {
                    topic: topic.to_string(),
                    reason: "memory broker rejected send".to_string(),
                });
            }
            state
                .sent
                .entry(topic.to_string())
                .or_default()
                .extend(payloads.iter().cloned());
            state.enqueue(topic, payloads);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
