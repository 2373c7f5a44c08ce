//! Training data loading
//!
//! Reads tabular readings from CSV, validates the column schema, parses
//! timestamps and labels, and returns readings sorted by timestamp.

use crate::error::{DetectorError, Result};
use crate::models::Reading;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const LABEL_COLUMN: &str = "label";
pub const SCENARIO_COLUMN: &str = "scenario";
pub const DEVICE_COLUMN: &str = "deviceId";

/// Epoch values above this are treated as milliseconds
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"];

/// Date-only values are read as midnight UTC
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Column layout of a training file
#[derive(Debug, Clone)]
pub struct DatasetSchema {
    /// Feature columns in model order, primary feature first
    pub feature_columns: Vec<String>,
    /// Keep only rows from this device
    pub device_id: Option<String>,
}

impl DatasetSchema {
    pub fn new(feature_columns: Vec<String>) -> Self {
        Self {
            feature_columns,
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    fn required_columns(&self) -> Vec<&str> {
        let mut cols = vec![TIMESTAMP_COLUMN];
        cols.extend(self.feature_columns.iter().map(String::as_str));
        cols.extend([LABEL_COLUMN, SCENARIO_COLUMN, DEVICE_COLUMN]);
        cols
    }
}

/// Readings sorted by timestamp, with their feature names
#[derive(Debug, Clone)]
pub struct Dataset {
    feature_names: Vec<String>,
    readings: Vec<Reading>,
}

/// Row-level statistics of a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub leak_ratio: f64,
    pub devices: BTreeMap<String, usize>,
    pub scenarios: BTreeMap<String, usize>,
}

impl Dataset {
    /// Build a dataset from readings, sorting them by timestamp
    ///
    /// The sort is stable, so readings sharing a timestamp keep input order.
    pub fn from_readings(feature_names: Vec<String>, mut readings: Vec<Reading>) -> Result<Self> {
        if feature_names.is_empty() {
            return Err(DetectorError::InvalidConfig(
                "at least one feature column is required".to_string(),
            ));
        }
        if let Some(bad) = readings
            .iter()
            .find(|r| r.features.len() != feature_names.len())
        {
            return Err(DetectorError::InvalidConfig(format!(
                "reading at {} has {} features, schema has {}",
                bad.timestamp,
                bad.features.len(),
                feature_names.len()
            )));
        }
        readings.sort_by_key(|r| r.timestamp);
        Ok(Self {
            feature_names,
            readings,
        })
    }

    /// Load readings from a CSV file
    pub fn from_csv_path<P: AsRef<Path>>(path: P, schema: &DatasetSchema) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Reading training data");
        let file = File::open(path)?;
        Self::from_csv_reader(file, schema)
    }

    /// Load readings from any CSV source with a header row
    pub fn from_csv_reader<R: Read>(reader: R, schema: &DatasetSchema) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = reader.headers()?.clone();

        let missing: Vec<String> = schema
            .required_columns()
            .into_iter()
            .filter(|col| !headers.iter().any(|h| h == *col))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(DetectorError::Schema { missing });
        }

        let index_of = |name: &str| headers.iter().position(|h| h == name).unwrap_or_default();
        let ts_idx = index_of(TIMESTAMP_COLUMN);
        let label_idx = index_of(LABEL_COLUMN);
        let scenario_idx = index_of(SCENARIO_COLUMN);
        let device_idx = index_of(DEVICE_COLUMN);
        let feature_idx: Vec<usize> = schema
            .feature_columns
            .iter()
            .map(|c| index_of(c.as_str()))
            .collect();

        let mut readings = Vec::new();
        let mut skipped_devices = 0usize;
        for record in reader.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let field = |idx: usize| record.get(idx).unwrap_or_default();

            let device_id = field(device_idx).to_string();
            if let Some(wanted) = &schema.device_id {
                if &device_id != wanted {
                    skipped_devices += 1;
                    continue;
                }
            }

            let timestamp = parse_timestamp(field(ts_idx)).ok_or_else(|| DetectorError::Parse {
                line,
                reason: format!("unparseable timestamp '{}'", field(ts_idx)),
            })?;
            let label = parse_label(field(label_idx)).ok_or_else(|| DetectorError::Parse {
                line,
                reason: format!("label must be 0 or 1, got '{}'", field(label_idx)),
            })?;
            let features = feature_idx
                .iter()
                .zip(&schema.feature_columns)
                .map(|(&idx, name)| {
                    field(idx)
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| DetectorError::Parse {
                            line,
                            reason: format!("column '{}' is not a number: '{}'", name, field(idx)),
                        })
                })
                .collect::<Result<Vec<f64>>>()?;

            readings.push(Reading {
                timestamp,
                features,
                label,
                device_id,
                scenario: field(scenario_idx).to_string(),
            });
        }

        debug!(
            rows = readings.len(),
            skipped_other_devices = skipped_devices,
            "Parsed training rows"
        );
        Self::from_readings(schema.feature_columns.clone(), readings)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Primary feature values of every reading labeled normal
    pub fn normal_primary_values(&self) -> Vec<f64> {
        self.readings
            .iter()
            .filter(|r| !r.is_leak())
            .map(Reading::primary)
            .collect()
    }

    pub fn summary(&self) -> DatasetSummary {
        let mut devices = BTreeMap::new();
        let mut scenarios = BTreeMap::new();
        for r in &self.readings {
            *devices.entry(r.device_id.clone()).or_insert(0) += 1;
            *scenarios.entry(r.scenario.clone()).or_insert(0) += 1;
        }
        let leaks = self.readings.iter().filter(|r| r.is_leak()).count();
        DatasetSummary {
            rows: self.readings.len(),
            leak_ratio: if self.readings.is_empty() {
                0.0
            } else {
                leaks as f64 / self.readings.len() as f64
            },
            devices,
            scenarios,
        }
    }
}

/// Parse a timestamp in RFC 3339, common date-time layouts, a bare date, or
/// epoch seconds/millis
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    let epoch: i64 = raw.parse().ok()?;
    if epoch.abs() >= EPOCH_MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

fn parse_label(raw: &str) -> Option<u8> {
    match raw.trim() {
        "0" => Some(0),
        "1" => Some(1),
        other => match other.parse::<f64>().ok()? {
            v if v == 0.0 => Some(0),
            v if v == 1.0 => Some(1),
            _ => None,
        },
    }
}
