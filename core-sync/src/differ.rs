//! # Device Set Differ
//!
//! Computes the change set that brings the hub (destination) in line with
//! the external registry (source).
//!
//! The destination is indexed by id up front. Source devices are then
//! streamed through [`DeviceSetDiffer::observe`]: a known id marks its
//! destination entry as seen, an unknown id becomes a create. Whatever is
//! left unseen at [`DeviceSetDiffer::finish`] becomes a delete. Memory is
//! bounded by the destination size plus the creates produced.
//!
//! Ids are compared case-sensitively. A duplicate id in either collection
//! is an error.

use bridge_traits::device::{ChangeKind, DeviceRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Result, SyncError};

/// Creates and deletes produced by one diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDiff {
    pub creates: Vec<DeviceRecord>,
    /// Sorted by id
    pub deletes: Vec<DeviceRecord>,
}

impl DeviceDiff {
    pub fn len(&self) -> usize {
        self.creates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.deletes.is_empty()
    }

    pub fn summary(&self) -> ChangeSetSummary {
        ChangeSetSummary {
            creates: self.creates.len() as u64,
            deletes: self.deletes.len() as u64,
        }
    }

    /// All changes tagged with their [`ChangeKind`], creates first.
    pub fn into_changes(self) -> impl Iterator<Item = DeviceRecord> {
        self.creates
            .into_iter()
            .map(|device| device.with_change_kind(ChangeKind::Create))
            .chain(
                self.deletes
                    .into_iter()
                    .map(|device| device.with_change_kind(ChangeKind::Delete)),
            )
    }
}

/// Counts of a staged change set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetSummary {
    pub creates: u64,
    pub deletes: u64,
}

impl ChangeSetSummary {
    pub fn total(&self) -> u64 {
        self.creates + self.deletes
    }
}

#[derive(Debug)]
struct IndexedDevice {
    record: DeviceRecord,
    seen: bool,
}

/// Streaming differ; see the module docs.
#[derive(Debug)]
pub struct DeviceSetDiffer {
    index: HashMap<String, IndexedDevice>,
    created_ids: HashSet<String>,
    creates: Vec<DeviceRecord>,
}

impl DeviceSetDiffer {
    /// Index the destination collection.
    pub fn new(destination: impl IntoIterator<Item = DeviceRecord>) -> Result<Self> {
        let mut index = HashMap::new();
        for record in destination {
            if index.contains_key(&record.id) {
                return Err(SyncError::DuplicateDeviceId {
                    device_id: record.id,
                    collection: "destination".to_string(),
                });
            }
            index.insert(record.id.clone(), IndexedDevice { record, seen: false });
        }

        Ok(Self {
            index,
            created_ids: HashSet::new(),
            creates: Vec::new(),
        })
    }

    /// Number of indexed destination devices
    pub fn destination_len(&self) -> usize {
        self.index.len()
    }

    /// Account for one source device.
    ///
    /// `make_record` is only invoked when the device has to be created.
    pub fn observe<F>(&mut self, device_id: &str, make_record: F) -> Result<()>
    where
        F: FnOnce() -> Result<DeviceRecord>,
    {
        let duplicate = || SyncError::DuplicateDeviceId {
            device_id: device_id.to_string(),
            collection: "source".to_string(),
        };

        if let Some(entry) = self.index.get_mut(device_id) {
            if entry.seen {
                return Err(duplicate());
            }
            entry.seen = true;
            return Ok(());
        }

        if !self.created_ids.insert(device_id.to_string()) {
            return Err(duplicate());
        }
        self.creates.push(make_record()?);
        Ok(())
    }

    pub fn finish(self) -> DeviceDiff {
        let mut deletes: Vec<DeviceRecord> = self
            .index
            .into_values()
            .filter(|entry| !entry.seen)
            .map(|entry| entry.record)
            .collect();
        deletes.sort_by(|a, b| a.id.cmp(&b.id));

        DeviceDiff {
            creates: self.creates,
            deletes,
        }
    }
}

/// Diff two fully materialized collections.
pub fn diff(
    source: impl IntoIterator<Item = DeviceRecord>,
    destination: impl IntoIterator<Item = DeviceRecord>,
) -> Result<DeviceDiff> {
    let mut differ = DeviceSetDiffer::new(destination)?;
    for record in source {
        let id = record.id.clone();
        differ.observe(&id, move || Ok(record))?;
    }
    Ok(differ.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn devices(ids: &[&str]) -> Vec<DeviceRecord> {
        ids.iter().map(|id| DeviceRecord::new(*id)).collect()
    }

    fn ids(records: &[DeviceRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_creates_and_deletes() {
        let result = diff(devices(&["A", "B", "C"]), devices(&["B", "C", "D"])).unwrap();

        assert_eq!(ids(&result.creates), vec!["A"]);
        assert_eq!(ids(&result.deletes), vec!["D"]);
        assert_eq!(result.summary(), ChangeSetSummary { creates: 1, deletes: 1 });
    }

    #[test]
    fn test_identical_sets_produce_nothing() {
        let result = diff(devices(&["A", "B"]), devices(&["B", "A"])).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_empty_source_deletes_everything_sorted() {
        let result = diff(Vec::new(), devices(&["Z", "M", "A"])).unwrap();
        assert!(result.creates.is_empty());
        assert_eq!(ids(&result.deletes), vec!["A", "M", "Z"]);
    }

    #[test]
    fn test_ids_are_case_sensitive() {
        let result = diff(devices(&["abc"]), devices(&["ABC"])).unwrap();
        assert_eq!(ids(&result.creates), vec!["abc"]);
        assert_eq!(ids(&result.deletes), vec!["ABC"]);
    }

    #[test]
    fn test_duplicate_in_destination() {
        let result = DeviceSetDiffer::new(devices(&["A", "A"]));
        assert!(matches!(
            result,
            Err(SyncError::DuplicateDeviceId { ref collection, .. }) if collection == "destination"
        ));
    }

    #[test]
    fn test_duplicate_in_source_matched_or_new() {
        let matched = diff(devices(&["B", "B"]), devices(&["B"]));
        assert!(matches!(matched, Err(SyncError::DuplicateDeviceId { .. })));

        let fresh = diff(devices(&["N", "N"]), devices(&["B"]));
        assert!(matches!(
            fresh,
            Err(SyncError::DuplicateDeviceId { ref device_id, ref collection })
                if device_id == "N" && collection == "source"
        ));
    }

    #[test]
    fn test_record_built_only_for_creates() {
        let mut differ = DeviceSetDiffer::new(devices(&["known"])).unwrap();
        differ
            .observe("known", || panic!("existing devices are not rebuilt"))
            .unwrap();
        differ
            .observe("new", || Ok(DeviceRecord::new("new").with_tag("EUI", "00")))
            .unwrap();

        let result = differ.finish();
        assert_eq!(result.creates[0].tag("EUI"), Some("00"));
    }

    #[test]
    fn test_change_kinds() {
        let changes: Vec<_> = diff(devices(&["A"]), devices(&["D"]))
            .unwrap()
            .into_changes()
            .map(|d| (d.id, d.change_kind))
            .collect();

        assert_eq!(
            changes,
            vec![
                ("A".to_string(), ChangeKind::Create),
                ("D".to_string(), ChangeKind::Delete)
            ]
        );
    }

    #[test]
    fn test_random_sets_match_set_difference() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let source: BTreeSet<String> = (0..rng.gen_range(0..40))
                .map(|_| format!("dev-{}", rng.gen_range(0..60)))
                .collect();
            let destination: BTreeSet<String> = (0..rng.gen_range(0..40))
                .map(|_| format!("dev-{}", rng.gen_range(0..60)))
                .collect();

            let result = diff(
                source.iter().map(DeviceRecord::new),
                destination.iter().map(DeviceRecord::new),
            )
            .unwrap();

            let creates: BTreeSet<String> = result.creates.iter().map(|d| d.id.clone()).collect();
            let deletes: Vec<String> = result.deletes.iter().map(|d| d.id.clone()).collect();
            let expected_deletes: Vec<String> =
                destination.difference(&source).cloned().collect();

            assert_eq!(creates, source.difference(&destination).cloned().collect());
            assert_eq!(deletes, expected_deletes);
            assert!(creates.iter().all(|id| !destination.contains(id)));
        }
    }
}
