//! Transport traits the consumer and producer are built on.
//!
//! A transport moves raw payload bytes; decoding, dispatch and lifecycle
//! bookkeeping stay in [`Consumer`](crate::Consumer),
//! [`Producer`](crate::Producer) and [`BrokerConnection`](crate::BrokerConnection).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BrokerError, EventSink};

/// One consumed record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Records consumed from one topic in one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub topic: String,
    pub messages: Vec<RawMessage>,
}

/// A position to mark as consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOffset {
    pub partition: i32,
    pub offset: i64,
}

impl From<&RawMessage> for MessageOffset {
    fn from(message: &RawMessage) -> Self {
        Self {
            partition: message.partition,
            offset: message.offset,
        }
    }
}

/// Producer-side compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    #[default]
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    /// Codec name as understood by the broker client.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of consumed batches.
#[async_trait]
pub trait ConsumerTransport: Send + Sync + 'static {
    /// Connect and subscribe to `topics`.
    async fn connect(&self, topics: &[String], events: EventSink) -> Result<(), BrokerError>;

    /// Wait for the next batches. `Ok(None)` means the stream has closed.
    async fn poll(&self) -> Result<Option<Vec<RawBatch>>, BrokerError>;

    /// Mark `offsets` of `topic` as consumed.
    async fn commit(&self, topic: &str, offsets: &[MessageOffset]) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Sink for produced messages.
#[async_trait]
pub trait ProducerTransport: Send + Sync + 'static {
    async fn connect(&self, events: EventSink) -> Result<(), BrokerError>;

    /// Deliver `payloads` to `topic`, resolving once the broker has accepted
    /// all of them.
    async fn send(
        &self,
        topic: &str,
        payloads: Vec<Vec<u8>>,
        compression: Compression,
    ) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_codec_is_snappy() {
        assert_eq!(Compression::default(), Compression::Snappy);
        assert_eq!(Compression::default().as_str(), "snappy");
    }

    #[test]
    fn codec_from_config_string() {
        let codec: Compression = serde_json::from_str("\"zstd\"").unwrap();
        assert_eq!(codec, Compression::Zstd);
    }
}
