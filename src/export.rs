//! Module for the deterministic CSV and GeoJSON export encoders.
//!
//! Both builders are pure functions of a record snapshot. They produce a
//! `(filename, bytes)` pair, writing the bytes anywhere is the caller's
//! business.
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::record::LightRecord;

/// First line of every CSV export, exactly as consuming tools expect it.
pub const CSV_HEADER: &str = "index,latitude,longitude,h_accuracy_m,timestamp_iso,brightness";

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for writing exports to disk.
pub struct ExportParameters {
    /// The directory exported files are written to.
    pub export_directory: String,
}

/// Formats one numeric CSV field.
///
/// Non-finite values become an empty field. Values with a magnitude of at
/// least 1 get exactly 6 fractional digits, smaller values get 8 so
/// sub-degree coordinates keep their precision.
pub fn format_field(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    if value.abs() >= 1.0 {
        format!("{:.6}", value)
    } else {
        format!("{:.8}", value)
    }
}

fn export_filename(extension: &str, stamp: DateTime<Local>) -> String {
    format!("light_gps_{}.{}", stamp.format("%Y%m%d_%H%M%S"), extension)
}

/// Builds the CSV export, stamped with the current local time.
pub fn build_csv(records: &[LightRecord]) -> (String, Vec<u8>) {
    build_csv_at(records, Local::now())
}

/// Builds the CSV export with an explicit filename timestamp.
///
/// One line per record in store order, `\n`-joined, no trailing newline.
/// The record timestamp is emitted verbatim as stored.
pub fn build_csv_at(records: &[LightRecord], stamp: DateTime<Local>) -> (String, Vec<u8>) {
    let mut lines: Vec<String> = Vec::with_capacity(records.len() + 1);
    lines.push(String::from(CSV_HEADER));
    for record in records {
        lines.push(format!(
            "{},{},{},{},{},{}",
            record.index,
            format_field(record.latitude),
            format_field(record.longitude),
            format_field(record.horizontal_accuracy),
            record.timestamp,
            format_field(record.brightness)
        ));
    }
    (export_filename("csv", stamp), lines.join("\n").into_bytes())
}

#[derive(Serialize, Debug)]
struct PointGeometry {
    #[serde(rename = "type")]
    geometry_type: &'static str,
    /// Longitude first, per GeoJSON convention.
    coordinates: [f64; 2],
}

#[derive(Serialize, Debug)]
struct FeatureProperties {
    index: u32,
    brightness: f64,
    timestamp: String,
    h_accuracy_m: f64,
}

#[derive(Serialize, Debug)]
struct Feature {
    #[serde(rename = "type")]
    feature_type: &'static str,
    geometry: PointGeometry,
    properties: FeatureProperties,
}

#[derive(Serialize, Debug)]
struct FeatureCollection {
    #[serde(rename = "type")]
    collection_type: &'static str,
    features: Vec<Feature>,
}

/// Builds the GeoJSON export, stamped with the current local time.
pub fn build_geojson(records: &[LightRecord]) -> Result<(String, Vec<u8>), Error> {
    build_geojson_at(records, Local::now())
}

/// Builds the GeoJSON export with an explicit filename timestamp.
///
/// Fails when any numeric property is NaN or infinite, the JSON number
/// model cannot represent those and silently emitting `null` would corrupt
/// the export for GIS consumers.
pub fn build_geojson_at(
    records: &[LightRecord],
    stamp: DateTime<Local>,
) -> Result<(String, Vec<u8>), Error> {
    let mut features: Vec<Feature> = Vec::with_capacity(records.len());
    for record in records {
        let numeric_fields = [
            ("latitude", record.latitude),
            ("longitude", record.longitude),
            ("h_accuracy_m", record.horizontal_accuracy),
            ("brightness", record.brightness),
        ];
        for (name, value) in numeric_fields.iter() {
            if !value.is_finite() {
                return Err(Error::Encoding(format!(
                    "record {} has a non-finite {} value",
                    record.index, name
                )));
            }
        }

        features.push(Feature {
            feature_type: "Feature",
            geometry: PointGeometry {
                geometry_type: "Point",
                coordinates: [record.longitude, record.latitude],
            },
            properties: FeatureProperties {
                index: record.index,
                brightness: record.brightness,
                timestamp: record.timestamp.clone(),
                h_accuracy_m: record.horizontal_accuracy,
            },
        });
    }

    let collection = FeatureCollection {
        collection_type: "FeatureCollection",
        features,
    };
    let bytes = match serde_json::to_vec_pretty(&collection) {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(Error::Encoding(format!(
                "cannot serialize feature collection: {}",
                err
            )));
        }
    };
    Ok((export_filename("geojson", stamp), bytes))
}
