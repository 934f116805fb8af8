//! Station group status.

use crate::SohStatusSummary;

/// Capability status of one station group.
///
/// The full list is replaced wholesale whenever a new batch declares
/// station-group state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StationGroupStatus {
    #[cfg_attr(feature = "serde", serde(rename = "stationGroupName"))]
    pub group_name: String,

    #[cfg_attr(feature = "serde", serde(rename = "groupCapabilityStatus", default))]
    pub capability_status: SohStatusSummary,

    /// Epoch milliseconds of the rollup this status came from.
    #[cfg_attr(feature = "serde", serde(default))]
    pub time: u64,

    /// Display priority, lower first.
    #[cfg_attr(feature = "serde", serde(default))]
    pub priority: i32,
}

impl StationGroupStatus {
    /// A group with no rollup yet, as seeded from configuration.
    pub fn unevaluated(group_name: impl Into<String>, priority: i32) -> Self {
        Self {
            group_name: group_name.into(),
            capability_status: SohStatusSummary::None,
            time: 0,
            priority,
        }
    }
}
