//! Service settings.
//!
//! Loaded with the `config` crate from an optional file (TOML, JSON or YAML,
//! picked by extension) layered under environment variables prefixed
//! `SOHWATCH`, with `__` separating nested keys:
//!
//! ```toml
//! [kafka]
//! client_id = "sohwatch"
//! brokers = ["kafka:9092"]
//! group_id = "user-interface"
//!
//! [kafka.consumer_topics]
//! ui_station_soh = "soh.ui-materialized-view"
//!
//! [soh]
//! stations = ["AAK", "ABC"]
//! station_groups = [{ name = "ALL_1", priority = 1 }]
//! ```
//!
//! `SOHWATCH__KAFKA__BROKERS=kafka-1:9092,kafka-2:9092` overrides the broker
//! list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use sohwatch_broker::Compression;
use sohwatch_engine::{SohSettings, SohTopics};
use sohwatch_types::StationGroupStatus;
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SOHWATCH";

/// Broker name selecting the in-process broker instead of Kafka.
pub const IN_PROCESS_BROKER: &str = "memory";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub kafka: KafkaSettings,
    pub soh: SohConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaSettings {
    pub client_id: String,
    pub brokers: Vec<String>,
    pub group_id: String,
    pub connection_timeout_ms: u64,
    pub max_wait_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub compression: Compression,
    pub consumer_topics: ConsumerTopics,
    pub producer_topics: ProducerTopics,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            client_id: "sohwatch".to_string(),
            brokers: Vec::new(),
            group_id: "user-interface".to_string(),
            connection_timeout_ms: 1000,
            max_wait_ms: 100,
            heartbeat_interval_ms: 3000,
            compression: Compression::default(),
            consumer_topics: ConsumerTopics::default(),
            producer_topics: ProducerTopics::default(),
        }
    }
}

impl KafkaSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Topics the consumer subscribes to.
    pub fn consumer_topic_list(&self) -> Vec<String> {
        vec![
            self.consumer_topics.ui_station_soh.clone(),
            self.consumer_topics.system_messages.clone(),
        ]
    }

    /// Topics the producer may publish to.
    pub fn producer_topic_list(&self) -> Vec<String> {
        vec![
            self.producer_topics.acknowledged.clone(),
            self.producer_topics.quieted.clone(),
        ]
    }

    /// Topics as the engine sees them.
    pub fn soh_topics(&self) -> SohTopics {
        SohTopics {
            station_soh: self.consumer_topics.ui_station_soh.clone(),
            acknowledged: self.producer_topics.acknowledged.clone(),
            quieted: self.producer_topics.quieted.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerTopics {
    pub ui_station_soh: String,
    pub system_messages: String,
}

impl Default for ConsumerTopics {
    fn default() -> Self {
        Self {
            ui_station_soh: SohTopics::default().station_soh,
            system_messages: "system.system-messages".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerTopics {
    pub acknowledged: String,
    pub quieted: String,
}

impl Default for ProducerTopics {
    fn default() -> Self {
        let topics = SohTopics::default();
        Self {
            acknowledged: topics.acknowledged,
            quieted: topics.quieted,
        }
    }
}

/// One configured station group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupSetting {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SohConfig {
    pub update_interval_ms: u64,
    pub default_quiet_interval_ms: u64,
    pub station_groups: Vec<GroupSetting>,
    pub stations: Vec<String>,
    pub mock_data: Option<PathBuf>,
}

impl Default for SohConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 20_000,
            default_quiet_interval_ms: 900_000,
            station_groups: Vec::new(),
            stations: Vec::new(),
            mock_data: None,
        }
    }
}

impl Settings {
    /// Load from `path` (if any) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .with_list_parse_key("soh.stations")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.kafka.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(SettingsError::Invalid("kafka.brokers must name at least one broker".to_string()));
        }
        if self.kafka.consumer_topics.ui_station_soh.is_empty() {
            return Err(SettingsError::Invalid(
                "kafka.consumer_topics.ui_station_soh must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Comma-separated broker list, as the Kafka client expects it.
    pub fn bootstrap_servers(&self) -> String {
        self.kafka.brokers.join(",")
    }

    /// True when every configured broker is the [`IN_PROCESS_BROKER`] marker.
    pub fn uses_in_process_broker(&self) -> bool {
        !self.kafka.brokers.is_empty() && self.kafka.brokers.iter().all(|b| b == IN_PROCESS_BROKER)
    }
}

impl SohSettings for Settings {
    fn update_interval(&self) -> Duration {
        Duration::from_millis(self.soh.update_interval_ms)
    }

    fn default_quiet_interval(&self) -> Duration {
        Duration::from_millis(self.soh.default_quiet_interval_ms)
    }

    fn station_groups(&self) -> Vec<StationGroupStatus> {
        let mut groups: Vec<StationGroupStatus> = self
            .soh
            .station_groups
            .iter()
            .map(|g| StationGroupStatus::unevaluated(g.name.clone(), g.priority))
            .collect();
        groups.sort_by_key(|g| g.priority);
        groups
    }
}
