//! Module for the append-only log of light records.
use crate::error::Error;
use crate::record::{LightRecord, LocationSample};

/// Append-only ordered log of [`LightRecord`]s.
///
/// Insertion order is display and export order. The store is intended for a
/// single logical writer, concurrent callers must serialize access
/// externally. Exports must run against [`RecordStore::snapshot`], never
/// against a live reference that a `clear` could empty mid-encode.
pub struct RecordStore {
    records: Vec<LightRecord>,
}

impl RecordStore {
    pub fn new() -> RecordStore {
        RecordStore {
            records: Vec::new(),
        }
    }

    /// Appends a record for the given brightness and location sample and
    /// returns its 1-based index.
    ///
    /// Fails when no sample is available, the caller must hold a current
    /// fix before recording. Brightness is stored exactly as given, a
    /// non-finite value only surfaces as a formatting concern at export
    /// time.
    pub fn add(
        &mut self,
        brightness: f64,
        sample: Option<&LocationSample>,
    ) -> Result<u32, Error> {
        let sample = match sample {
            Some(sample) => sample,
            None => {
                return Err(Error::InvalidInput(String::from(
                    "no location sample available yet",
                )));
            }
        };

        let index = self.records.len() as u32 + 1;
        self.records
            .push(LightRecord::from_sample(index, brightness, sample));
        log::debug!(target: "lightlogd::store", "Stored record \'{}\' with brightness \'{}\'!", index, brightness);
        Ok(index)
    }

    /// Empties the log. The next `add` restarts indexing at 1.
    pub fn clear(&mut self) {
        log::debug!(target: "lightlogd::store", "Cleared \'{}\' records!", self.records.len());
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-only view of the records in insertion order.
    pub fn records(&self) -> &[LightRecord] {
        &self.records
    }

    /// Copies the current records so an export cannot race a later `clear`.
    pub fn snapshot(&self) -> Vec<LightRecord> {
        self.records.clone()
    }
}

impl Default for RecordStore {
    fn default() -> RecordStore {
        RecordStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> LocationSample {
        LocationSample {
            latitude: 25.033,
            longitude: 121.565,
            horizontal_accuracy: 5.0,
            fix_timestamp: Utc.ymd(2024, 1, 1).and_hms(0, 0, 0),
        }
    }

    #[test]
    fn add_assigns_sequential_one_based_indices() {
        let mut store = RecordStore::new();
        let sample = sample();
        for expected in 1..=5u32 {
            let index = store.add(expected as f64, Some(&sample)).unwrap();
            assert_eq!(index, expected);
        }
        for (position, record) in store.records().iter().enumerate() {
            assert_eq!(record.index as usize, position + 1);
        }
    }

    #[test]
    fn add_without_sample_is_rejected() {
        let mut store = RecordStore::new();
        let result = store.add(100.0, None);
        match result {
            Err(Error::InvalidInput(_)) => {}
            other => panic!("expected InvalidInput, got {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn clear_resets_indexing() {
        let mut store = RecordStore::new();
        let sample = sample();
        store.add(1.0, Some(&sample)).unwrap();
        store.add(2.0, Some(&sample)).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.add(3.0, Some(&sample)).unwrap(), 1);
    }

    #[test]
    fn non_finite_brightness_is_accepted_as_given() {
        let mut store = RecordStore::new();
        let sample = sample();
        store.add(f64::NAN, Some(&sample)).unwrap();
        store.add(f64::INFINITY, Some(&sample)).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.records()[0].brightness.is_nan());
        assert!(store.records()[1].brightness.is_infinite());
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let mut store = RecordStore::new();
        let sample = sample();
        store.add(1.0, Some(&sample)).unwrap();
        let snapshot = store.snapshot();
        store.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(store.is_empty());
    }
}
