//! # sohwatch-types
//!
//! Data model for station state-of-health (SOH) telemetry. These types are
//! shared by the broker client and the aggregation engine, and describe the
//! JSON documents exchanged over the broker.
//!
//! ## Features
//!
//! - `serde`: JSON serialization via serde, using the camelCase field names
//!   the rest of the deployment speaks
//!
//! ## Example
//!
//! ```rust
//! use sohwatch_types::{StationAndStationGroupSoh, StationSohSnapshot};
//!
//! let aak = StationSohSnapshot::empty("AAK");
//! let payload = StationAndStationGroupSoh::new(Vec::new(), vec![aak]);
//!
//! assert_eq!(payload.station_soh.len(), 1);
//! assert!(!payload.is_update_response);
//! ```
//!
//! ## Timestamps
//!
//! All instants are milliseconds since the Unix epoch, all durations are
//! [`Milliseconds`].

mod change;
mod group;
mod message;
mod snapshot;
mod time;

pub use change::*;
pub use group::*;
pub use message::*;
pub use snapshot::*;
pub use time::*;
