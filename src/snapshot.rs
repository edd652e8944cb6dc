//! In-memory snapshot model.
//!
//! A snapshot is one collection run for a logical date. Producers hand the
//! store a [`NewSnapshot`]; the store stamps versions and timestamps at write
//! time and hands back a `StoredSnapshot` on read.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Version of the on-disk snapshot layout.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Version of the statistics calculations that produced the payloads.
pub const CALCULATION_VERSION: &str = "1.0.0";

const SNAPSHOT_ID_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Success,
    Partial,
    Failed,
}

impl SnapshotStatus {
    /// Status implied by how many configured districts were collected.
    pub fn from_outcome(successful: usize, failed: usize) -> Self {
        match (successful, failed) {
            (_, 0) if successful > 0 => SnapshotStatus::Success,
            (0, _) => SnapshotStatus::Failed,
            _ => SnapshotStatus::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Success => "success",
            SnapshotStatus::Partial => "partial",
            SnapshotStatus::Failed => "failed",
        }
    }
}

/// One district's statistics. The payload is opaque to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictRecord<T = serde_json::Value> {
    pub district_id: String,
    pub collected_at: DateTime<Utc>,
    pub data: T,
}

/// A fully collected snapshot, as produced by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSnapshot<T = serde_json::Value> {
    pub data_as_of_date: NaiveDate,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub source: String,
    #[serde(default, rename = "processingDuration")]
    pub processing_duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Districts the run was asked to collect. Derived from the successful
    /// and failed lists when left empty.
    #[serde(default)]
    pub configured_districts: Vec<String>,
    #[serde(default)]
    pub failed_districts: Vec<String>,
    pub districts: Vec<DistrictRecord<T>>,
}

impl<T> NewSnapshot<T> {
    /// Directory name for this snapshot. Derived from the logical date so
    /// re-processing a period lands in the same place.
    pub fn snapshot_id(&self) -> String {
        snapshot_id_for(self.data_as_of_date)
    }

    pub fn successful_district_ids(&self) -> Vec<String> {
        self.districts.iter().map(|d| d.district_id.clone()).collect()
    }
}

pub fn snapshot_id_for(date: NaiveDate) -> String {
    date.format(SNAPSHOT_ID_FORMAT).to_string()
}

/// Returns the logical date when `id` is a well-formed snapshot id.
pub fn parse_snapshot_id(id: &str) -> Option<NaiveDate> {
    // chrono accepts unpadded fields, the directory names must not
    if id.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(id, SNAPSHOT_ID_FORMAT).ok()
}

pub fn validate_snapshot_id(id: &str) -> Result<NaiveDate> {
    parse_snapshot_id(id).ok_or_else(|| StoreError::InvalidSnapshotId(id.to_string()))
}

/// District ids become part of file names, so only a conservative
/// character set is allowed.
pub fn validate_district_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidDistrictId(id.to_string()))
    }
}

/// Same major version means compatible. Anything unparseable is not.
pub fn is_compatible_version(found: &str, expected: &str) -> bool {
    match (major_version(found), major_version(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn major_version(version: &str) -> Option<u64> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    if parts.any(|p| p.parse::<u64>().is_err()) {
        return None;
    }
    Some(major)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_outcome() {
        assert_eq!(SnapshotStatus::from_outcome(5, 0), SnapshotStatus::Success);
        assert_eq!(SnapshotStatus::from_outcome(3, 2), SnapshotStatus::Partial);
        assert_eq!(SnapshotStatus::from_outcome(0, 4), SnapshotStatus::Failed);
        assert_eq!(SnapshotStatus::from_outcome(0, 0), SnapshotStatus::Failed);
    }

    #[test]
    fn snapshot_id_is_zero_padded_date() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(snapshot_id_for(date), "2024-01-05");
        assert_eq!(parse_snapshot_id("2024-01-05"), Some(date));
    }

    #[test]
    fn non_date_ids_rejected() {
        assert!(parse_snapshot_id("latest-successful.json").is_none());
        assert!(parse_snapshot_id("2024-1-5").is_none());
        assert!(parse_snapshot_id("2024-02-30").is_none());
        assert!(matches!(
            validate_snapshot_id("../etc"),
            Err(StoreError::InvalidSnapshotId(_))
        ));
    }

    #[test]
    fn district_ids_must_be_file_safe() {
        assert!(validate_district_id("42").is_ok());
        assert!(validate_district_id("F").is_ok());
        assert!(validate_district_id("").is_err());
        assert!(validate_district_id("a/b").is_err());
        assert!(validate_district_id("..").is_err());
    }

    #[test]
    fn major_version_compatibility() {
        assert!(is_compatible_version("1.0.0", "1.4.2"));
        assert!(!is_compatible_version("2.0.0", "1.0.0"));
        assert!(!is_compatible_version("garbage", "1.0.0"));
        assert!(!is_compatible_version("1.x", "1.0.0"));
    }

    #[test]
    fn new_snapshot_parses_producer_json() {
        let json = r#"{
            "dataAsOfDate": "2024-01-15",
            "status": "partial",
            "source": "dashboard",
            "processingDuration": 1200,
            "failedDistricts": ["7"],
            "districts": [
                {"districtId": "42", "collectedAt": "2024-01-15T06:00:00Z", "data": {"members": 10}}
            ]
        }"#;

        let snapshot: NewSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.snapshot_id(), "2024-01-15");
        assert_eq!(snapshot.status, SnapshotStatus::Partial);
        assert_eq!(snapshot.processing_duration_ms, 1200);
        assert_eq!(snapshot.successful_district_ids(), vec!["42".to_string()]);
        assert!(snapshot.configured_districts.is_empty());
    }
}
