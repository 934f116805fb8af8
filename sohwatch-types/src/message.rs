//! The document carried on the SOH topic and pushed to subscribers.

use crate::{StationGroupStatus, StationSohSnapshot};

/// Station-group state plus per-station snapshots.
///
/// The same shape is consumed from the broker and pushed to subscribers.
/// `is_update_response` marks a confirmation of an acknowledgement or quiet
/// action that must be delivered without batching.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StationAndStationGroupSoh {
    #[cfg_attr(feature = "serde", serde(default))]
    pub station_groups: Vec<StationGroupStatus>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub station_soh: Vec<StationSohSnapshot>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub is_update_response: bool,
}

impl StationAndStationGroupSoh {
    /// Create a regular (batched) payload.
    pub fn new(station_groups: Vec<StationGroupStatus>, station_soh: Vec<StationSohSnapshot>) -> Self {
        Self {
            station_groups,
            station_soh,
            is_update_response: false,
        }
    }

    /// Create an update-response payload.
    pub fn update_response(
        station_groups: Vec<StationGroupStatus>,
        station_soh: Vec<StationSohSnapshot>,
    ) -> Self {
        Self {
            station_groups,
            station_soh,
            is_update_response: true,
        }
    }

    /// Names of the stations carried, in payload order.
    pub fn station_names(&self) -> impl Iterator<Item = &str> {
        self.station_soh.iter().map(|s| s.station_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_response_sets_flag() {
        let msg = StationAndStationGroupSoh::update_response(Vec::new(), Vec::new());
        assert!(msg.is_update_response);
        assert!(!StationAndStationGroupSoh::default().is_update_response);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_missing_fields_default() {
        let msg: StationAndStationGroupSoh =
            serde_json::from_str(r#"{"stationSoh":[{"stationName":"AAK","uuid":"v1"}]}"#).unwrap();
        assert!(msg.station_groups.is_empty());
        assert!(!msg.is_update_response);
        assert_eq!(msg.station_names().collect::<Vec<_>>(), vec!["AAK"]);
    }
}
