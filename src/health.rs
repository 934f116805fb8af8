//! Health report for the broker clients and engine.

use std::collections::BTreeMap;

use serde::Serialize;
use sohwatch_broker::BrokerClient;
use sohwatch_engine::SohEngine;

/// Health of one broker client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHealth {
    pub status: String,
    pub connected: bool,
    pub up_time_seconds: f64,
    /// Newest first, keyed by position.
    pub history: BTreeMap<usize, String>,
}

impl ClientHealth {
    pub fn of(client: &dyn BrokerClient) -> Self {
        Self {
            status: client.status().to_string(),
            connected: client.connected(),
            up_time_seconds: client.up_time_seconds(),
            history: client
                .status_history()
                .into_iter()
                .enumerate()
                .map(|(i, entry)| (i, format!("{} {}", entry.id, entry.value)))
                .collect(),
        }
    }
}

/// Health of the whole service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub consumer: ClientHealth,
    pub producer: ClientHealth,
    pub stations: usize,
    pub pending_stations: usize,
    pub subscribers: usize,
}

impl HealthReport {
    pub fn collect(consumer: &dyn BrokerClient, producer: &dyn BrokerClient, engine: &SohEngine) -> Self {
        Self {
            consumer: ClientHealth::of(consumer),
            producer: ClientHealth::of(producer),
            stations: engine.get_all_station_snapshots().len(),
            pending_stations: engine.pending_count(),
            subscribers: engine.fanout().subscriber_count(),
        }
    }

    /// Both clients connected.
    pub fn is_healthy(&self) -> bool {
        self.consumer.connected && self.producer.connected
    }
}
