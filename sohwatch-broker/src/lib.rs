//! # sohwatch-broker
//!
//! Reconnecting publish/subscribe client for the SOH message bus.
//!
//! Both the [`Consumer`] and the [`Producer`] hold a [`BrokerConnection`],
//! which owns the connection lifecycle: status, uptime, a bounded status
//! history, and a fixed-delay reconnect loop that retries until it succeeds
//! or the connection is stopped.
//!
//! ## Transports
//!
//! - **Memory** (always available) - [`MemoryBroker`], an in-process broker
//!   for tests and offline runs
//! - **Kafka** (`kafka` feature) - rdkafka-backed consumer and producer
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sohwatch_broker::{BrokerClient, ConnectionStatus, MemoryBroker, Producer};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let broker = MemoryBroker::new();
//! let producer = Producer::new(Arc::new(broker.clone()), vec!["acks".to_string()]);
//!
//! producer.start().await;
//! assert_eq!(producer.status(), ConnectionStatus::Connected);
//!
//! producer.send("acks", vec![b"{}".to_vec()], None).await.unwrap();
//! assert_eq!(broker.sent("acks").len(), 1);
//! # }
//! ```

pub mod connection;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod producer;
pub mod status;
pub mod transport;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use connection::{
    BrokerClient, BrokerConnection, ConnectionEvent, Connector, EventSink, Role, RETRY_BROKER_DELAY,
};
pub use consumer::{BatchHandler, Consumer};
pub use error::BrokerError;
pub use memory::MemoryBroker;
pub use producer::Producer;
pub use status::{ConnectionStatus, HistoryValue, StatusHistory, StatusHistoryEntry, HISTORY_SIZE};
pub use transport::{
    Compression, ConsumerTransport, MessageOffset, ProducerTransport, RawBatch, RawMessage,
};
