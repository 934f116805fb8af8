//! Wires settings, broker clients and the engine into one running service.

use std::sync::Arc;

use anyhow::{Context, Result};
use sohwatch_broker::{Consumer, ConsumerTransport, Producer, ProducerTransport};
use sohwatch_engine::{FlushHandle, SohEngine};

use crate::directory::{load_mock_data, ConfiguredStations};
use crate::health::HealthReport;
use crate::settings::Settings;

/// A built, not yet started, service.
pub struct Service {
    consumer: Consumer,
    producer: Producer,
    engine: SohEngine,
}

impl Service {
    /// Build the broker clients and the engine.
    ///
    /// Fails if the station directory or mock data cannot be read.
    pub fn build(
        settings: &Settings,
        consumer_transport: Arc<dyn ConsumerTransport>,
        producer_transport: Arc<dyn ProducerTransport>,
    ) -> Result<Self> {
        let consumer = Consumer::new(consumer_transport, settings.kafka.consumer_topic_list());
        let producer = Producer::new(producer_transport, settings.kafka.producer_topic_list())
            .with_compression(settings.kafka.compression);

        let stations = ConfiguredStations::new(&settings.soh.stations)
            .context("Invalid station directory")?;

        let engine = SohEngine::builder()
            .topics(settings.kafka.soh_topics())
            .producer(producer.clone())
            .settings(settings)
            .directory(stations)
            .build()
            .context("Failed to build SOH engine")?;

        if let Some(path) = &settings.soh.mock_data {
            let snapshots = load_mock_data(path).context("Failed to load mock data")?;
            engine.seed_snapshots(snapshots);
        }

        Ok(Self {
            consumer,
            producer,
            engine,
        })
    }

    pub fn engine(&self) -> &SohEngine {
        &self.engine
    }

    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Register the engine, then connect both clients.
    pub async fn start(&self) -> FlushHandle {
        let timer = self.engine.initialize(&self.consumer);
        self.consumer.start().await;
        self.producer.start().await;
        timer
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::collect(&self.consumer, &self.producer, &self.engine)
    }

    /// Stop the flush timer and both clients.
    pub async fn shutdown(&self, timer: FlushHandle) {
        timer.shutdown().await;
        self.consumer.stop().await;
        self.producer.stop().await;
        tracing::info!("SOH service stopped");
    }
}
