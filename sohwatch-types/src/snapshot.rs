//! Station snapshot - one versioned report of a station's state of health.

/// Rolled-up health of a station, channel or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum SohStatusSummary {
    /// No data has been evaluated yet.
    #[default]
    None,
    Bad,
    Marginal,
    Good,
}

/// Status of an individual monitor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum SohStatus {
    Bad,
    Marginal,
    Good,
}

/// A single monitored value on a channel (lag, missing, an environment issue, ...).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SohMonitorValueAndStatus {
    /// Monitor type name, e.g. `LAG`, `MISSING` or `ENV_CLOCK_LOCKED`.
    pub monitor_type: String,

    pub status: SohStatus,

    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<f64>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub value_present: bool,

    /// Set when the status changed since the last acknowledgement.
    #[cfg_attr(feature = "serde", serde(default))]
    pub has_unacknowledged_changes: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub contributing: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub threshold_marginal: Option<f64>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub threshold_bad: Option<f64>,

    /// Epoch milliseconds until which this monitor is quieted, if at all.
    #[cfg_attr(feature = "serde", serde(default))]
    pub quiet_until_ms: Option<u64>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub quiet_duration_ms: Option<u64>,
}

impl SohMonitorValueAndStatus {
    /// Create a monitor value with no measurement attached.
    pub fn new(monitor_type: impl Into<String>, status: SohStatus) -> Self {
        Self {
            monitor_type: monitor_type.into(),
            status,
            value: None,
            value_present: false,
            has_unacknowledged_changes: false,
            contributing: false,
            threshold_marginal: None,
            threshold_bad: None,
            quiet_until_ms: None,
            quiet_duration_ms: None,
        }
    }

    /// Flag this monitor as changed since the last acknowledgement.
    pub fn unacknowledged(mut self) -> Self {
        self.has_unacknowledged_changes = true;
        self
    }
}

/// Per-channel monitor values and rolled-up status.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ChannelSoh {
    pub channel_name: String,

    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_soh_status: SohStatusSummary,

    #[cfg_attr(feature = "serde", serde(default))]
    pub all_soh_monitor_value_and_statuses: Vec<SohMonitorValueAndStatus>,
}

impl ChannelSoh {
    /// Create a channel with no monitor values.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            channel_soh_status: SohStatusSummary::None,
            all_soh_monitor_value_and_statuses: Vec::new(),
        }
    }

    /// Add a monitor value.
    pub fn monitor(mut self, value: SohMonitorValueAndStatus) -> Self {
        self.all_soh_monitor_value_and_statuses.push(value);
        self
    }

    /// Monitor values flagged as changed since the last acknowledgement.
    pub fn unacknowledged(&self) -> impl Iterator<Item = &SohMonitorValueAndStatus> {
        self.all_soh_monitor_value_and_statuses
            .iter()
            .filter(|mvs| mvs.has_unacknowledged_changes)
    }
}

/// A monitor type that contributes to the station's rolled-up status.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StatusContributor {
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub monitor_type: String,

    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<f64>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub value_present: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub contributing: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub status_summary: SohStatusSummary,
}

/// A station-wide aggregate value (e.g. timeliness, environment issue count).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StationAggregate {
    pub aggregate_type: String,

    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<f64>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub value_present: bool,
}

/// The station's capability status within one station group.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StationGroupMembership {
    pub group_name: String,

    pub station_name: String,

    #[cfg_attr(feature = "serde", serde(default))]
    pub soh_station_capability: SohStatusSummary,
}

/// One versioned, complete report of a station's state of health.
///
/// Identity is [`station_name`](Self::station_name); [`uuid`](Self::uuid)
/// versions each report. A newer report always replaces an older one
/// wholesale.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StationSohSnapshot {
    pub station_name: String,

    /// Opaque version id minted by the producer for each logical change.
    pub uuid: String,

    /// Epoch milliseconds at which the snapshot was computed upstream.
    #[cfg_attr(feature = "serde", serde(rename = "time", default))]
    pub creation_time: u64,

    #[cfg_attr(feature = "serde", serde(rename = "sohStatusSummary", default))]
    pub status_summary: SohStatusSummary,

    #[cfg_attr(feature = "serde", serde(default))]
    pub needs_acknowledgement: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub needs_attention: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub status_contributors: Vec<StatusContributor>,

    #[cfg_attr(feature = "serde", serde(rename = "allStationAggregates", default))]
    pub all_aggregates: Vec<StationAggregate>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_sohs: Vec<ChannelSoh>,

    #[cfg_attr(feature = "serde", serde(rename = "stationGroups", default))]
    pub station_group_memberships: Vec<StationGroupMembership>,
}

impl StationSohSnapshot {
    /// Create a snapshot with a uuid and no SOH content.
    pub fn new(station_name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            station_name: station_name.into(),
            uuid: uuid.into(),
            creation_time: 0,
            status_summary: SohStatusSummary::None,
            needs_acknowledgement: false,
            needs_attention: false,
            status_contributors: Vec::new(),
            all_aggregates: Vec::new(),
            channel_sohs: Vec::new(),
            station_group_memberships: Vec::new(),
        }
    }

    /// The placeholder held for a known station before any real data arrives.
    ///
    /// Its uuid is empty, so the first real snapshot for the station always
    /// replaces it.
    pub fn empty(station_name: impl Into<String>) -> Self {
        Self::new(station_name, "")
    }

    /// Set the upstream creation time.
    pub fn created_at(mut self, creation_time: u64) -> Self {
        self.creation_time = creation_time;
        self
    }

    /// Add a channel.
    pub fn channel(mut self, channel: ChannelSoh) -> Self {
        self.channel_sohs.push(channel);
        self
    }

    /// Copy of this snapshot with channel-level detail stripped.
    ///
    /// Only the top-level per-station status is pushed to subscribers; the
    /// channel detail is fetched on demand.
    pub fn without_channels(&self) -> Self {
        Self {
            station_name: self.station_name.clone(),
            uuid: self.uuid.clone(),
            creation_time: self.creation_time,
            status_summary: self.status_summary,
            needs_acknowledgement: self.needs_acknowledgement,
            needs_attention: self.needs_attention,
            status_contributors: self.status_contributors.clone(),
            all_aggregates: self.all_aggregates.clone(),
            channel_sohs: Vec::new(),
            station_group_memberships: self.station_group_memberships.clone(),
        }
    }

    /// Check if this is a placeholder that has never received real data.
    pub fn is_placeholder(&self) -> bool {
        self.uuid.is_empty()
    }
}
