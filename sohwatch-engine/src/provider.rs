//! Read-only collaborators the engine is seeded from.

use std::time::Duration;

use sohwatch_types::StationGroupStatus;

use crate::EngineError;

/// Operator-facing SOH settings.
pub trait SohSettings: Send + Sync {
    /// Batching delay configured for subscribers.
    fn update_interval(&self) -> Duration;

    /// Quiet duration offered by default when quieting a channel monitor.
    fn default_quiet_interval(&self) -> Duration;

    /// Station groups to display, in priority order, before any rollup arrives.
    fn station_groups(&self) -> Vec<StationGroupStatus>;
}

/// Source of the stations the engine tracks.
pub trait StationDirectory: Send + Sync {
    fn station_names(&self) -> Result<Vec<String>, EngineError>;
}

/// Fixed settings, mostly useful in tests and embedded setups.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub update_interval: Duration,
    pub default_quiet_interval: Duration,
    pub station_groups: Vec<StationGroupStatus>,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(20),
            default_quiet_interval: Duration::from_secs(15 * 60),
            station_groups: Vec::new(),
        }
    }
}

impl SohSettings for StaticSettings {
    fn update_interval(&self) -> Duration {
        self.update_interval
    }

    fn default_quiet_interval(&self) -> Duration {
        self.default_quiet_interval
    }

    fn station_groups(&self) -> Vec<StationGroupStatus> {
        self.station_groups.clone()
    }
}

impl StationDirectory for Vec<String> {
    fn station_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.clone())
    }
}
