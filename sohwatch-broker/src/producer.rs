//! Topic publisher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sohwatch_types::current_timestamp_ms;

use crate::connection::{BrokerClient, BrokerConnection, Connector, EventSink, Role};
use crate::status::{ConnectionStatus, HistoryValue};
use crate::transport::{Compression, ProducerTransport};
use crate::BrokerError;

struct ProducerConnector {
    transport: Arc<dyn ProducerTransport>,
}

#[async_trait]
impl Connector for ProducerConnector {
    async fn connect(&self, events: EventSink) -> Result<(), BrokerError> {
        self.transport.connect(events).await
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.transport.disconnect().await
    }
}

/// Reconnecting publisher restricted to a configured set of topics.
///
/// Sends are never retried; callers that need delivery guarantees retry on
/// the returned error themselves.
#[derive(Clone)]
pub struct Producer {
    connection: BrokerConnection,
    transport: Arc<dyn ProducerTransport>,
    topics: Arc<Vec<String>>,
    compression: Compression,
}

impl Producer {
    /// Create a producer for `topics` over `transport`.
    pub fn new(transport: Arc<dyn ProducerTransport>, topics: Vec<String>) -> Self {
        let connector = Arc::new(ProducerConnector {
            transport: Arc::clone(&transport),
        });
        Self {
            connection: BrokerConnection::new(Role::Producer, connector),
            transport,
            topics: Arc::new(topics),
            compression: Compression::default(),
        }
    }

    /// Like [`new`](Self::new) with a non-default reconnect delay.
    pub fn with_retry_delay(
        transport: Arc<dyn ProducerTransport>,
        topics: Vec<String>,
        retry_delay: Duration,
    ) -> Self {
        let connector = Arc::new(ProducerConnector {
            transport: Arc::clone(&transport),
        });
        Self {
            connection: BrokerConnection::with_retry_delay(Role::Producer, connector, retry_delay),
            transport,
            topics: Arc::new(topics),
            compression: Compression::default(),
        }
    }

    /// Codec used when [`send`](Self::send) is not given one.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
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

    /// Publish `messages` on `topic`.
    ///
    /// Empty batches and unconfigured topics are rejected without touching
    /// the broker. A broker failure moves the connection to `Error`.
    pub async fn send(
        &self,
        topic: &str,
        messages: Vec<Vec<u8>>,
        compression: Option<Compression>,
    ) -> Result<(), BrokerError> {
        if messages.is_empty() {
            tracing::error!(topic, "Producer failed to send message(s), no message data provided");
            return Err(BrokerError::EmptyBatch);
        }

        if !self.topics.iter().any(|t| t == topic) {
            tracing::error!(topic, "Producer failed to send message(s), topic has not been configured");
            return Err(BrokerError::UnknownTopic(topic.to_string()));
        }

        let count = messages.len();
        let compression = compression.unwrap_or(self.compression);
        match self.transport.send(topic, messages, compression).await {
            Ok(()) => {
                self.connection.update_status(ConnectionStatus::Connected);
                self.connection.record_status_history(
                    "producer.sent",
                    format!("Last produced {} message(s) at {}", count, current_timestamp_ms()),
                );
                tracing::debug!(topic, count, %compression, "Produced message(s)");
                Ok(())
            }
            Err(e) => {
                self.connection.update_status(ConnectionStatus::Error);
                self.connection
                    .record_status_history("producer.error", HistoryValue::Error(e.to_string()));
                tracing::error!(topic, count, error = %e, "Producer failed to send message(s)");
                Err(e)
            }
        }
    }

    /// Serialize each message as JSON and [`send`](Self::send) them.
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        messages: &[T],
        compression: Option<Compression>,
    ) -> Result<(), BrokerError> {
        let payloads = messages
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;
        self.send(topic, payloads, compression).await
    }
}

impl BrokerClient for Producer {
    fn connection(&self) -> &BrokerConnection {
        &self.connection
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("topics", &self.topics)
            .field("compression", &self.compression)
            .field("status", &self.connection.status())
            .finish()
    }
}
