//! Module that contains all valid record types for this application.
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
/// Struct representing a single resolved location fix delivered by the provider.
///
/// A sample is immutable once delivered and is superseded wholesale by the
/// next sample, there is no merging of partial updates.
pub struct LocationSample {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Radius of the confidence circle around the fix in meters.
    /// May be non-finite if the provider could not estimate it.
    pub horizontal_accuracy: f64,
    /// Timestamp the fix was resolved at.
    pub fix_timestamp: chrono::DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Struct representing a brightness reading tagged with the location fix that
/// was current when the reading was taken.
///
/// A record is a snapshot, not a view: all location fields are copied from a
/// [`LocationSample`] at creation time and never change afterwards.
pub struct LightRecord {
    /// Sequence position at creation time, 1-based.
    pub index: u32,
    /// Latitude of the fix in degrees.
    pub latitude: f64,
    /// Longitude of the fix in degrees.
    pub longitude: f64,
    /// Horizontal accuracy of the fix in meters.
    pub horizontal_accuracy: f64,
    /// ISO-8601 timestamp with fractional seconds, derived from the fix
    /// timestamp, not from the wall clock at append time.
    pub timestamp: String,
    /// Brightness value in lx, stored exactly as supplied by the caller.
    pub brightness: f64,
}

impl LightRecord {
    /// Creates a record from a brightness value and a location sample.
    ///
    /// The fix timestamp is rendered once here so every later export emits
    /// the identical string.
    pub fn from_sample(index: u32, brightness: f64, sample: &LocationSample) -> LightRecord {
        LightRecord {
            index,
            latitude: sample.latitude,
            longitude: sample.longitude,
            horizontal_accuracy: sample.horizontal_accuracy,
            timestamp: sample
                .fix_timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            brightness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> LocationSample {
        LocationSample {
            latitude: 25.033,
            longitude: 121.565,
            horizontal_accuracy: 5.0,
            fix_timestamp: Utc.ymd(2024, 1, 1).and_hms(0, 0, 0),
        }
    }

    #[test]
    fn record_copies_sample_fields() {
        let rec = LightRecord::from_sample(1, 120.5, &sample());
        assert_eq!(rec.index, 1);
        assert_eq!(rec.latitude, 25.033);
        assert_eq!(rec.longitude, 121.565);
        assert_eq!(rec.horizontal_accuracy, 5.0);
        assert_eq!(rec.brightness, 120.5);
    }

    #[test]
    fn record_timestamp_has_fractional_seconds() {
        let rec = LightRecord::from_sample(1, 0.0, &sample());
        assert_eq!(rec.timestamp, "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn record_timestamp_truncates_to_millis() {
        let mut s = sample();
        s.fix_timestamp = Utc.ymd(2024, 1, 1).and_hms_micro(12, 30, 45, 123_456);
        let rec = LightRecord::from_sample(3, 1.0, &s);
        assert_eq!(rec.timestamp, "2024-01-01T12:30:45.123Z");
    }
}
