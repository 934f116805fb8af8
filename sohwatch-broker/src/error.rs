//! Error types for the broker client.

use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connecting to the broker failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The transport was used before `connect` or after `disconnect`.
    #[error("Not connected to the broker")]
    NotConnected,

    /// A consumed payload could not be decoded.
    #[error("Failed to parse message at offset {offset}: {reason}")]
    Parse { offset: i64, reason: String },

    /// Committing consumed offsets failed.
    #[error("Offset commit failed: {0}")]
    Commit(String),

    /// The broker rejected or timed out a produced message.
    #[error("Failed to send to topic {topic}: {reason}")]
    Send { topic: String, reason: String },

    /// A send was requested with no messages.
    #[error("No message data provided")]
    EmptyBatch,

    /// A send was requested for a topic the producer was not configured with.
    #[error("Topic has not been configured: {0}")]
    UnknownTopic(String),

    /// An outbound message could not be serialized.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for BrokerError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        BrokerError::Connection(err.to_string())
    }
}
