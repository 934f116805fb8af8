//! # sohwatch
//!
//! Station state-of-health service for interactive analysis displays.
//!
//! The service consumes consolidated SOH from the message bus, keeps the
//! latest snapshot per station, pushes batched updates to subscribers, and
//! publishes operator acknowledgements and quiet requests back to the bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Service                            │
//! │  ┌──────────┐    ┌─────────────┐    ┌──────────────────────┐ │
//! │  │ Consumer │───▶│  SohEngine  │───▶│ subscribers (fan-out) │ │
//! │  └──────────┘    └──────┬──────┘    └──────────────────────┘ │
//! │                         │ acknowledge / quiet                │
//! │                         ▼                                    │
//! │                   ┌──────────┐                               │
//! │                   │ Producer │                               │
//! │                   └──────────┘                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`settings`]**: layered file/environment configuration
//! - **[`directory`]**: the configured station list and optional mock seed data
//! - **[`health`]**: serializable health report for the broker clients
//! - **[`service`]**: builds and runs the clients and the engine together
//!
//! ## Usage
//!
//! ```bash
//! # Run against Kafka (requires the `kafka` feature)
//! sohwatch --config sohwatch.toml
//!
//! # Override the broker list from the environment
//! SOHWATCH__KAFKA__BROKERS=kafka:9092 sohwatch --config sohwatch.toml
//! ```
//!
//! ### As a library
//!
//! ```
//! use std::sync::Arc;
//! use sohwatch::{Service, Settings};
//! use sohwatch_broker::MemoryBroker;
//!
//! let mut settings = Settings::default();
//! settings.kafka.brokers = vec!["localhost:9092".to_string()];
//! settings.soh.stations = vec!["AAK".to_string()];
//!
//! let broker = MemoryBroker::new();
//! let service = Service::build(&settings, Arc::new(broker.clone()), Arc::new(broker)).unwrap();
//! assert_eq!(service.engine().get_all_station_snapshots().len(), 1);
//!
//! # tokio_test::block_on(async {
//! let timer = service.start().await;
//! assert!(service.health().is_healthy());
//! service.shutdown(timer).await;
//! # });
//! ```

pub mod directory;
pub mod health;
pub mod service;
pub mod settings;

pub use directory::{load_mock_data, ConfiguredStations, DirectoryError};
pub use health::{ClientHealth, HealthReport};
pub use service::Service;
pub use settings::{Settings, SettingsError, IN_PROCESS_BROKER};
