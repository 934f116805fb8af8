//! Time representation for serialization.
//!
//! Instants travel as plain `u64` milliseconds since the Unix epoch and
//! durations as [`Milliseconds`], which keeps every payload readable by the
//! non-Rust producers and consumers on the same topics.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Duration in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Milliseconds(pub u64);

impl Milliseconds {
    /// Create from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Create from seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    /// Get the value in milliseconds.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get the value in seconds (truncated).
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// Convert to a standard Duration.
    pub const fn to_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl From<Duration> for Milliseconds {
    fn from(d: Duration) -> Self {
        Self(d.as_millis() as u64)
    }
}

impl From<Milliseconds> for Duration {
    fn from(m: Milliseconds) -> Self {
        Duration::from_millis(m.0)
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let d = Duration::from_secs(90);
        let m = Milliseconds::from(d);
        assert_eq!(m.as_millis(), 90_000);
        assert_eq!(m.as_secs(), 90);
        assert_eq!(m.to_duration(), d);
    }

    #[test]
    fn current_timestamp_is_after_2020() {
        assert!(current_timestamp_ms() > 1_577_836_800_000);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_transparent() {
        let m = Milliseconds::from_secs(60);
        assert_eq!(serde_json::to_string(&m).unwrap(), "60000");
    }
}
