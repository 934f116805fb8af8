//! # sohwatch-engine
//!
//! Streaming aggregation of station state-of-health (SOH) for interactive
//! displays.
//!
//! The engine consumes consolidated SOH messages from the broker, keeps the
//! latest snapshot per station, and pushes trimmed updates to subscribers in
//! batches once the inbound stream goes quiet. It also publishes operator
//! acknowledgements and quiet requests back to the broker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sohwatch_broker::{Consumer, MemoryBroker, Producer};
//! use sohwatch_engine::{SohEngine, SohTopics, StaticSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = MemoryBroker::new();
//!     let topics = SohTopics::default();
//!
//!     let consumer = Consumer::new(Arc::new(broker.clone()), vec![topics.station_soh.clone()]);
//!     let producer = Producer::new(
//!         Arc::new(broker.clone()),
//!         vec![topics.acknowledged.clone(), topics.quieted.clone()],
//!     );
//!
//!     let engine = SohEngine::builder()
//!         .topics(topics)
//!         .producer(producer.clone())
//!         .settings(&StaticSettings::default())
//!         .directory(vec!["AAK".to_string()])
//!         .build()
//!         .unwrap();
//!
//!     let mut updates = engine.subscribe();
//!     let timer = engine.initialize(&consumer);
//!     consumer.start().await;
//!     producer.start().await;
//!
//!     while let Ok(update) = updates.recv().await {
//!         println!("{} station(s) changed", update.station_soh.len());
//!     }
//!     timer.shutdown().await;
//! }
//! ```
//!
//! ## Batching
//!
//! Regular snapshots are collected in a pending set. Every [`FLUSH_TICK`] the
//! engine checks whether anything is pending and whether [`QUIET_WINDOW`] has
//! passed since the last consumed batch; if so, the pending snapshots are
//! pushed with their channel detail stripped. Update-responses (answers to an
//! acknowledge or quiet) skip the batching and are pushed immediately.
//! Every known station starts out as a pending empty placeholder, so the
//! first flush announces the full station list.

mod clock;
mod engine;
mod error;
mod fanout;
mod provider;
mod store;
mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{SohEngine, SohEngineBuilder, SohTopics, TIMING_TARGET};
pub use error::EngineError;
pub use fanout::{SohFanout, DEFAULT_FANOUT_CAPACITY};
pub use provider::{SohSettings, StaticSettings, StationDirectory};
pub use store::{Applied, SnapshotStore};
pub use timer::{FlushHandle, FLUSH_TICK, QUIET_WINDOW};

// Re-export types for convenience
pub use sohwatch_types::{
    AcknowledgedStatusChange, ChannelMonitorInput, ChannelMonitorPair, QuietedStatusChange,
    StationAndStationGroupSoh, StationGroupStatus, StationSohSnapshot,
};
