//! User-initiated status changes published back onto the broker.

use crate::Milliseconds;

/// One monitor/channel pair covered by an acknowledgement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SohStatusChange {
    /// Epoch milliseconds of the snapshot in which the change was observed.
    pub first_change_time: u64,

    #[cfg_attr(feature = "serde", serde(rename = "sohMonitorType"))]
    pub monitor_type: String,

    pub changed_channel: String,
}

/// An analyst's acknowledgement of every outstanding change on one station.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AcknowledgedStatusChange {
    pub id: String,

    pub acknowledged_by: String,

    /// Epoch milliseconds.
    pub acknowledged_at: u64,

    pub acknowledged_station: String,

    pub acknowledged_changes: Vec<SohStatusChange>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub comment: Option<String>,
}

/// A request to suppress alerting on one channel/monitor pair until `quiet_until`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct QuietedStatusChange {
    pub station_name: String,

    #[cfg_attr(feature = "serde", serde(rename = "sohMonitorType"))]
    pub monitor_type: String,

    pub channel_name: String,

    /// Epoch milliseconds.
    pub quiet_until: u64,

    pub quiet_duration: Milliseconds,

    pub quieted_by: String,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub comment: Option<String>,
}

/// A channel/monitor pair named in a quiet request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ChannelMonitorPair {
    pub channel_name: String,

    pub monitor_type: String,
}

impl ChannelMonitorPair {
    pub fn new(channel_name: impl Into<String>, monitor_type: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            monitor_type: monitor_type.into(),
        }
    }
}

/// One quiet request item: a station, a duration and the pairs to quiet.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ChannelMonitorInput {
    pub station_name: String,

    pub channel_monitor_pairs: Vec<ChannelMonitorPair>,

    pub quiet_duration_ms: u64,

    #[cfg_attr(feature = "serde", serde(default))]
    pub comment: Option<String>,
}
