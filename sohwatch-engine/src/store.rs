//! Snapshot storage: the latest snapshot per station plus the set waiting
//! for the next flush.

use std::collections::BTreeMap;

use sohwatch_types::{StationGroupStatus, StationSohSnapshot};

/// Outcome of offering a snapshot to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Written to the primary map; `pending` says whether it also waits for
    /// the next flush.
    Stored { pending: bool },
    /// Same uuid as the stored snapshot; dropped.
    Duplicate,
}

impl Applied {
    pub fn is_stored(&self) -> bool {
        matches!(self, Applied::Stored { .. })
    }
}

/// Primary and pending snapshot maps plus the current station-group list.
///
/// Keyed by station name. Iteration is in station-name order.
#[derive(Debug, Default, Clone)]
pub struct SnapshotStore {
    snapshots: BTreeMap<String, StationSohSnapshot>,
    pending: BTreeMap<String, StationSohSnapshot>,
    groups: Vec<StationGroupStatus>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an empty placeholder for every station not already tracked.
    ///
    /// Placeholders are pending like any stored snapshot, so the first flush
    /// announces every known station.
    pub fn seed_placeholders<I, S>(&mut self, stations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in stations {
            let name = name.into();
            if !self.snapshots.contains_key(&name) {
                let placeholder = StationSohSnapshot::empty(name.clone());
                self.pending.insert(name.clone(), placeholder.clone());
                self.snapshots.insert(name, placeholder);
            }
        }
    }

    /// Offer a snapshot.
    ///
    /// It replaces the stored one when it is an update-response, when the
    /// station is unknown, or when its uuid differs from the stored uuid.
    /// A stored regular snapshot always becomes pending; an update-response
    /// only refreshes a station that is already pending.
    pub fn apply(&mut self, snapshot: StationSohSnapshot, is_update_response: bool) -> Applied {
        let replaces = is_update_response
            || self
                .snapshots
                .get(&snapshot.station_name)
                .map_or(true, |existing| existing.uuid != snapshot.uuid);
        if !replaces {
            return Applied::Duplicate;
        }

        let pending = !is_update_response || self.pending.contains_key(&snapshot.station_name);
        if pending {
            self.pending
                .insert(snapshot.station_name.clone(), snapshot.clone());
        }
        self.snapshots.insert(snapshot.station_name.clone(), snapshot);
        Applied::Stored { pending }
    }

    /// Replace the station-group list wholesale.
    pub fn replace_groups(&mut self, groups: Vec<StationGroupStatus>) {
        self.groups = groups;
    }

    pub fn groups(&self) -> &[StationGroupStatus] {
        &self.groups
    }

    pub fn get(&self, station_name: &str) -> Option<&StationSohSnapshot> {
        self.snapshots.get(station_name)
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &StationSohSnapshot> {
        self.snapshots.values()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return every pending snapshot.
    pub fn take_pending(&mut self) -> Vec<StationSohSnapshot> {
        std::mem::take(&mut self.pending).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(station: &str, uuid: &str) -> StationSohSnapshot {
        StationSohSnapshot::new(station, uuid)
    }

    #[test]
    fn same_uuid_keeps_first() {
        let mut store = SnapshotStore::new();
        let first = snap("AAK", "v1").created_at(1);
        let second = snap("AAK", "v1").created_at(2);

        assert_eq!(store.apply(first, false), Applied::Stored { pending: true });
        assert_eq!(store.apply(second, false), Applied::Duplicate);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("AAK").unwrap().creation_time, 1);
    }

    #[test]
    fn new_uuid_overwrites() {
        let mut store = SnapshotStore::new();
        store.apply(snap("AAK", "v1"), false);
        store.apply(snap("AAK", "v2"), false);

        assert_eq!(store.get("AAK").unwrap().uuid, "v2");
        assert_eq!(store.pending_len(), 1);
    }

    #[test]
    fn placeholders_are_pending_until_replaced() {
        let mut store = SnapshotStore::new();
        store.seed_placeholders(["AAK", "ABC"]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.pending_len(), 2);
        assert!(store.get("AAK").unwrap().is_placeholder());

        store.apply(snap("AAK", "v1"), false);
        let pending = store.take_pending();
        assert_eq!(pending[0].uuid, "v1");
        assert!(pending[1].is_placeholder());
    }

    #[test]
    fn seeding_does_not_clobber_real_data() {
        let mut store = SnapshotStore::new();
        store.apply(snap("AAK", "v1"), false);
        store.take_pending();
        store.seed_placeholders(vec!["AAK".to_string()]);
        assert_eq!(store.get("AAK").unwrap().uuid, "v1");
        assert!(!store.has_pending());
    }

    #[test]
    fn update_response_only_refreshes_already_pending() {
        let mut store = SnapshotStore::new();
        store.apply(snap("AAK", "v1"), false);
        store.take_pending();

        // Same uuid is still written when it is an update-response.
        assert_eq!(store.apply(snap("AAK", "v1"), true), Applied::Stored { pending: false });
        assert!(!store.has_pending());

        store.apply(snap("ABC", "v1"), false);
        assert_eq!(store.apply(snap("ABC", "v2"), true), Applied::Stored { pending: true });
        assert_eq!(store.take_pending()[0].uuid, "v2");
    }

    #[test]
    fn take_pending_clears() {
        let mut store = SnapshotStore::new();
        store.apply(snap("B", "1"), false);
        store.apply(snap("A", "1"), false);

        let names: Vec<String> = store.take_pending().into_iter().map(|s| s.station_name).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(!store.has_pending());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn groups_are_replaced_wholesale() {
        let mut store = SnapshotStore::new();
        store.replace_groups(vec![
            StationGroupStatus::unevaluated("A", 1),
            StationGroupStatus::unevaluated("B", 2),
        ]);
        store.replace_groups(vec![StationGroupStatus::unevaluated("C", 1)]);

        assert_eq!(store.groups().len(), 1);
        assert_eq!(store.groups()[0].group_name, "C");
    }
}
