//! Kafka transports built on rdkafka (librdkafka bindings).
//!
//! Client log lines and errors are routed through an [`EventContext`] into
//! `tracing` and the owning connection's status history.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sohwatch_broker::kafka::KafkaTransport;
//! use sohwatch_broker::{BrokerClient, Consumer, Producer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let kafka = KafkaTransport::builder()
//!         .brokers("localhost:9092")
//!         .group_id("soh-gateway")
//!         .client_id("sohwatch");
//!
//!     let consumer = Consumer::new(
//!         Arc::new(kafka.clone().build_consumer()),
//!         vec!["soh.ui-materialized-view".to_string()],
//!     );
//!     let producer = Producer::new(
//!         Arc::new(kafka.build_producer()),
//!         vec!["soh.ack-station-soh".to_string()],
//!     );
//!
//!     consumer.start().await;
//!     producer.start().await;
//!     println!("consumer connected: {}", consumer.connected());
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rdkafka::client::ClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{CommitMode, Consumer as _, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::statistics::Statistics;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};

use crate::connection::{ConnectionEvent, EventSink};
use crate::transport::{
    Compression, ConsumerTransport, MessageOffset, ProducerTransport, RawBatch, RawMessage,
};
use crate::BrokerError;

/// Client context that reports librdkafka activity to a connection.
pub struct EventContext {
    events: EventSink,
}

impl ClientContext for EventContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => tracing::error!(target: "librdkafka", fac, "{}", log_message),
            RDKafkaLogLevel::Warning => tracing::warn!(target: "librdkafka", fac, "{}", log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                tracing::info!(target: "librdkafka", fac, "{}", log_message)
            }
            RDKafkaLogLevel::Debug => tracing::debug!(target: "librdkafka", fac, "{}", log_message),
        }
    }

    fn stats(&self, statistics: Statistics) {
        self.events.emit(ConnectionEvent::Heartbeat(format!(
            "client={} queued={}",
            statistics.client_id, statistics.msg_cnt
        )));
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let event = match error.rdkafka_error_code() {
            Some(RDKafkaErrorCode::AllBrokersDown) => ConnectionEvent::Disconnected(reason.to_string()),
            Some(RDKafkaErrorCode::RequestTimedOut) | Some(RDKafkaErrorCode::OperationTimedOut) => {
                ConnectionEvent::RequestTimeout(reason.to_string())
            }
            Some(RDKafkaErrorCode::Fatal) => ConnectionEvent::Crashed(format!("{}: {}", error, reason)),
            _ => ConnectionEvent::Error(format!("{}: {}", error, reason)),
        };
        self.events.emit(event);
    }
}

impl ConsumerContext for EventContext {}

type KafkaConsumer = StreamConsumer<EventContext>;

/// Settings shared by the Kafka consumer and producer transports.
#[derive(Debug, Clone)]
pub struct KafkaTransport {
    brokers: String,
    group_id: String,
    client_id: String,
    connection_timeout: Duration,
    heartbeat_interval: Duration,
    max_wait: Duration,
    max_batch: usize,
}

impl KafkaTransport {
    /// Create a new builder for configuring the transports.
    pub fn builder() -> KafkaTransportBuilder {
        KafkaTransportBuilder::default()
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set(
                "socket.connection.setup.timeout.ms",
                self.connection_timeout.as_millis().to_string(),
            )
            .set(
                "statistics.interval.ms",
                self.heartbeat_interval.as_millis().to_string(),
            )
            .set_log_level(RDKafkaLogLevel::Info);
        config
    }

    /// Build the consumer-side transport.
    pub fn build_consumer(self) -> KafkaConsumerTransport {
        KafkaConsumerTransport {
            settings: self,
            consumer: RwLock::new(None),
        }
    }

    /// Build the producer-side transport.
    pub fn build_producer(self) -> KafkaProducerTransport {
        KafkaProducerTransport {
            settings: self,
            events: Mutex::new(None),
            producers: Mutex::new(HashMap::new()),
        }
    }
}

/// Consumer transport backed by an rdkafka `StreamConsumer`.
///
/// Auto-commit is disabled; offsets are committed only for batches that
/// decoded cleanly.
pub struct KafkaConsumerTransport {
    settings: KafkaTransport,
    consumer: RwLock<Option<Arc<KafkaConsumer>>>,
}

impl KafkaConsumerTransport {
    fn current(&self) -> Result<Arc<KafkaConsumer>, BrokerError> {
        self.consumer.read().clone().ok_or(BrokerError::NotConnected)
    }
}

fn detach<M: Message>(message: &M) -> RawMessage {
    RawMessage {
        partition: message.partition(),
        offset: message.offset(),
        payload: message.payload().map(|p| p.to_vec()),
    }
}

#[async_trait]
impl ConsumerTransport for KafkaConsumerTransport {
    async fn connect(&self, topics: &[String], events: EventSink) -> Result<(), BrokerError> {
        let settings = &self.settings;
        let mut config = settings.base_config();
        config
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set(
                "heartbeat.interval.ms",
                settings.heartbeat_interval.as_millis().to_string(),
            )
            .set("fetch.wait.max.ms", settings.max_wait.as_millis().to_string());

        let consumer: KafkaConsumer = config.create_with_context(EventContext { events })?;

        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&names)?;
        // Surface an unreachable cluster as a connect failure.
        consumer.fetch_metadata(None, settings.connection_timeout)?;

        tracing::info!(brokers = %settings.brokers, group = %settings.group_id, ?topics, "Kafka consumer subscribed");
        *self.consumer.write() = Some(Arc::new(consumer));
        Ok(())
    }

    async fn poll(&self) -> Result<Option<Vec<RawBatch>>, BrokerError> {
        let consumer = self.current()?;

        let mut grouped: Vec<RawBatch> = Vec::new();
        let mut push = |topic: &str, message: RawMessage| {
            match grouped.iter_mut().find(|b| b.topic == topic) {
                Some(batch) => batch.messages.push(message),
                None => grouped.push(RawBatch {
                    topic: topic.to_string(),
                    messages: vec![message],
                }),
            }
        };

        {
            let first = consumer.recv().await?;
            push(first.topic(), detach(&first));
        }

        let mut collected = 1;
        while collected < self.settings.max_batch {
            match tokio::time::timeout(self.settings.max_wait, consumer.recv()).await {
                Ok(Ok(message)) => {
                    push(message.topic(), detach(&message));
                    collected += 1;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Kafka receive failed mid-batch");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(Some(grouped))
    }

    async fn commit(&self, topic: &str, offsets: &[MessageOffset]) -> Result<(), BrokerError> {
        let consumer = self.current()?;

        let mut highest: HashMap<i32, i64> = HashMap::new();
        for offset in offsets {
            let entry = highest.entry(offset.partition).or_insert(offset.offset);
            *entry = (*entry).max(offset.offset);
        }

        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in highest {
            tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| BrokerError::Commit(e.to_string()))?;
        }

        consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if let Some(consumer) = self.consumer.write().take() {
            consumer.unsubscribe();
        }
        Ok(())
    }
}

impl std::fmt::Debug for KafkaConsumerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaConsumerTransport")
            .field("settings", &self.settings)
            .field("connected", &self.consumer.read().is_some())
            .finish()
    }
}

/// Producer transport backed by rdkafka `FutureProducer`s, one per codec.
pub struct KafkaProducerTransport {
    settings: KafkaTransport,
    events: Mutex<Option<EventSink>>,
    producers: Mutex<HashMap<Compression, FutureProducer<EventContext>>>,
}

impl KafkaProducerTransport {
    fn create(&self, compression: Compression, events: EventSink) -> Result<FutureProducer<EventContext>, BrokerError> {
        let mut config = self.settings.base_config();
        config
            .set("compression.codec", compression.as_str())
            .set(
                "message.timeout.ms",
                self.settings.connection_timeout.as_millis().max(1).to_string(),
            );
        Ok(config.create_with_context(EventContext { events })?)
    }

    fn producer_for(&self, compression: Compression) -> Result<FutureProducer<EventContext>, BrokerError> {
        let events = self.events.lock().clone().ok_or(BrokerError::NotConnected)?;
        let mut producers = self.producers.lock();
        if let Some(producer) = producers.get(&compression) {
            return Ok(producer.clone());
        }
        let producer = self.create(compression, events)?;
        producers.insert(compression, producer.clone());
        Ok(producer)
    }
}

#[async_trait]
impl ProducerTransport for KafkaProducerTransport {
    async fn connect(&self, events: EventSink) -> Result<(), BrokerError> {
        let producer = self.create(Compression::default(), events.clone())?;
        producer
            .client()
            .fetch_metadata(None, self.settings.connection_timeout)?;

        *self.events.lock() = Some(events);
        self.producers.lock().insert(Compression::default(), producer);
        tracing::info!(brokers = %self.settings.brokers, "Kafka producer connected");
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        payloads: Vec<Vec<u8>>,
        compression: Compression,
    ) -> Result<(), BrokerError> {
        let producer = self.producer_for(compression)?;
        let timeout = Timeout::After(self.settings.connection_timeout);

        for payload in &payloads {
            let record = FutureRecord::<(), [u8]>::to(topic).payload(payload.as_slice());
            producer
                .send(record, timeout)
                .await
                .map_err(|(e, _)| BrokerError::Send {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let producers: Vec<_> = self.producers.lock().drain().map(|(_, p)| p).collect();
        for producer in producers {
            if let Err(e) = producer.flush(self.settings.connection_timeout) {
                tracing::warn!(error = %e, "Failed to flush Kafka producer");
            }
        }
        *self.events.lock() = None;
        Ok(())
    }
}

impl std::fmt::Debug for KafkaProducerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducerTransport")
            .field("settings", &self.settings)
            .field("codecs", &self.producers.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`KafkaTransport`].
#[derive(Debug, Default, Clone)]
pub struct KafkaTransportBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    client_id: Option<String>,
    connection_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    max_wait: Option<Duration>,
    max_batch: Option<usize>,
}

impl KafkaTransportBuilder {
    /// Set the Kafka broker addresses (comma-separated).
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group ID.
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the connection/request timeout (default: 1 second).
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Set the heartbeat interval (default: 3 seconds).
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Set how long to wait for more messages when filling a batch (default: 100 ms).
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Set the most messages returned by one poll (default: 500).
    pub fn max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = Some(max_batch);
        self
    }

    /// Build the settings.
    pub fn build(self) -> KafkaTransport {
        KafkaTransport {
            brokers: self.brokers.unwrap_or_else(|| "localhost:9092".to_string()),
            group_id: self.group_id.unwrap_or_else(|| "sohwatch".to_string()),
            client_id: self.client_id.unwrap_or_else(|| "sohwatch".to_string()),
            connection_timeout: self.connection_timeout.unwrap_or(Duration::from_millis(1000)),
            heartbeat_interval: self.heartbeat_interval.unwrap_or(Duration::from_millis(3000)),
            max_wait: self.max_wait.unwrap_or(Duration::from_millis(100)),
            max_batch: self.max_batch.unwrap_or(500).max(1),
        }
    }

    /// Build the consumer-side transport.
    pub fn build_consumer(self) -> KafkaConsumerTransport {
        self.build().build_consumer()
    }

    /// Build the producer-side transport.
    pub fn build_producer(self) -> KafkaProducerTransport {
        self.build().build_producer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let settings = KafkaTransport::builder().build();
        assert_eq!(settings.brokers, "localhost:9092");
        assert_eq!(settings.group_id, "sohwatch");
        assert_eq!(settings.connection_timeout, Duration::from_millis(1000));
        assert_eq!(settings.heartbeat_interval, Duration::from_millis(3000));
        assert_eq!(settings.max_wait, Duration::from_millis(100));
    }

    #[test]
    fn builder_stores_brokers() {
        let builder = KafkaTransport::builder().brokers("broker1:9092,broker2:9092");
        assert_eq!(builder.brokers.unwrap(), "broker1:9092,broker2:9092");
    }

    #[test]
    fn builder_chains_all_options() {
        let settings = KafkaTransport::builder()
            .brokers("localhost:9092")
            .group_id("test")
            .client_id("gateway")
            .connection_timeout(Duration::from_secs(5))
            .heartbeat_interval(Duration::from_secs(1))
            .max_wait(Duration::from_millis(50))
            .max_batch(0)
            .build();

        assert_eq!(settings.group_id, "test");
        assert_eq!(settings.client_id, "gateway");
        assert_eq!(settings.connection_timeout, Duration::from_secs(5));
        assert_eq!(settings.max_batch, 1);
    }

    #[test]
    fn builder_default_is_empty() {
        let builder = KafkaTransportBuilder::default();
        assert!(builder.brokers.is_none());
        assert!(builder.group_id.is_none());
        assert!(builder.max_batch.is_none());
    }

    #[tokio::test]
    async fn poll_before_connect_is_an_error() {
        let transport = KafkaTransport::builder().build_consumer();
        assert!(matches!(transport.poll().await, Err(BrokerError::NotConnected)));
    }
}
