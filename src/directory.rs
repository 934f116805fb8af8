//! Station directory and seed data.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sohwatch_engine::{EngineError, StationDirectory};
use sohwatch_types::{StationAndStationGroupSoh, StationSohSnapshot};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Station name at position {0} is blank")]
    BlankStation(usize),

    #[error("Failed to read mock data from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse mock data from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<DirectoryError> for EngineError {
    fn from(e: DirectoryError) -> Self {
        EngineError::Directory(e.to_string())
    }
}

/// The stations listed in settings.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredStations {
    names: Vec<String>,
}

impl ConfiguredStations {
    /// Trims names and drops repeats, keeping first-seen order.
    pub fn new<I, S>(names: I) -> Result<Self, DirectoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let mut unique = Vec::new();
        for (i, name) in names.into_iter().enumerate() {
            let name = name.as_ref().trim();
            if name.is_empty() {
                return Err(DirectoryError::BlankStation(i));
            }
            if seen.insert(name.to_string()) {
                unique.push(name.to_string());
            }
        }
        if unique.is_empty() {
            tracing::warn!("No stations configured, the engine starts empty");
        }
        Ok(Self { names: unique })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl StationDirectory for ConfiguredStations {
    fn station_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.names.clone())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MockData {
    // Tried in order; snapshots first since every message field is optional.
    Snapshots(Vec<StationSohSnapshot>),
    Message(StationAndStationGroupSoh),
    Messages(Vec<StationAndStationGroupSoh>),
}

/// Read seed snapshots from a JSON file.
///
/// Accepts a single SOH message, an array of messages, or a bare array of
/// station snapshots.
pub fn load_mock_data(path: &Path) -> Result<Vec<StationSohSnapshot>, DirectoryError> {
    let raw = std::fs::read(path).map_err(|source| DirectoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let data: MockData = serde_json::from_slice(&raw).map_err(|source| DirectoryError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let snapshots = match data {
        MockData::Message(message) => message.station_soh,
        MockData::Messages(messages) => messages.into_iter().flat_map(|m| m.station_soh).collect(),
        MockData::Snapshots(snapshots) => snapshots,
    };
    tracing::info!(path = %path.display(), count = snapshots.len(), "Loaded mock SOH data");
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn names_are_trimmed_and_deduplicated() {
        let stations = ConfiguredStations::new([" AAK", "ABC", "AAK "]).unwrap();
        assert_eq!(stations.station_names().unwrap(), vec!["AAK", "ABC"]);
        assert_eq!(stations.len(), 2);
    }

    #[test]
    fn blank_name_is_rejected() {
        let result = ConfiguredStations::new(["AAK", "  "]);
        assert!(matches!(result, Err(DirectoryError::BlankStation(1))));
    }

    #[test]
    fn empty_list_is_allowed() {
        let stations = ConfiguredStations::new(Vec::<String>::new()).unwrap();
        assert!(stations.is_empty());
    }

    #[test]
    fn mock_data_accepts_a_message() {
        let message = StationAndStationGroupSoh::new(
            Vec::new(),
            vec![StationSohSnapshot::new("AAK", "a"), StationSohSnapshot::new("ABC", "b")],
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&serde_json::to_vec(&message).unwrap()).unwrap();

        let snapshots = load_mock_data(file.path()).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].uuid, "b");
    }

    #[test]
    fn mock_data_accepts_bare_snapshots() {
        let snapshots = vec![StationSohSnapshot::new("AAK", "a")];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&serde_json::to_vec(&snapshots).unwrap()).unwrap();

        assert_eq!(load_mock_data(file.path()).unwrap()[0].station_name, "AAK");
    }

    #[test]
    fn malformed_mock_data_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        assert!(matches!(load_mock_data(file.path()), Err(DirectoryError::Parse { .. })));
        assert!(matches!(
            load_mock_data(Path::new("/nonexistent/mock.json")),
            Err(DirectoryError::Read { .. })
        ));
    }
}
