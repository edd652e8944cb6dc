//! Snapshot-level metadata, the authoritative record of status and versions.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::snapshot::{
    is_compatible_version, NewSnapshot, SnapshotStatus, CALCULATION_VERSION, SCHEMA_VERSION,
};

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: String,
    pub calculation_version: String,
    pub status: SnapshotStatus,
    pub configured_districts: Vec<String>,
    pub successful_districts: Vec<String>,
    pub failed_districts: Vec<String>,
    pub errors: Vec<String>,
    /// Milliseconds spent collecting.
    #[serde(rename = "processingDuration")]
    pub processing_duration_ms: u64,
    pub source: String,
    pub data_as_of_date: NaiveDate,
}

impl SnapshotMetadata {
    pub fn is_success(&self) -> bool {
        self.status == SnapshotStatus::Success
    }

    /// Rejects snapshots whose major schema or calculation version differs
    /// from what this build reads.
    pub fn check_compatibility(&self) -> Result<()> {
        let checks = [
            ("schemaVersion", &self.schema_version, SCHEMA_VERSION),
            ("calculationVersion", &self.calculation_version, CALCULATION_VERSION),
        ];

        for (field, found, expected) in checks {
            if !is_compatible_version(found, expected) {
                return Err(StoreError::SchemaVersionMismatch {
                    snapshot_id: self.snapshot_id.clone(),
                    field,
                    found: found.clone(),
                    expected: expected.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Builds metadata for a snapshot about to be committed. District lists are
/// sorted and de-duplicated; configured districts default to the union of
/// successful and failed ones.
pub fn build_metadata<T>(snapshot: &NewSnapshot<T>, created_at: DateTime<Utc>) -> SnapshotMetadata {
    let successful: BTreeSet<String> = snapshot.successful_district_ids().into_iter().collect();
    let failed: BTreeSet<String> = snapshot
        .failed_districts
        .iter()
        .filter(|id| !successful.contains(*id))
        .cloned()
        .collect();

    let configured: BTreeSet<String> = if snapshot.configured_districts.is_empty() {
        successful.union(&failed).cloned().collect()
    } else {
        snapshot.configured_districts.iter().cloned().collect()
    };

    SnapshotMetadata {
        snapshot_id: snapshot.snapshot_id(),
        created_at,
        schema_version: SCHEMA_VERSION.to_string(),
        calculation_version: CALCULATION_VERSION.to_string(),
        status: snapshot.status,
        configured_districts: configured.into_iter().collect(),
        successful_districts: successful.into_iter().collect(),
        failed_districts: failed.into_iter().collect(),
        errors: snapshot.errors.clone(),
        processing_duration_ms: snapshot.processing_duration_ms,
        source: snapshot.source.clone(),
        data_as_of_date: snapshot.data_as_of_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DistrictRecord;
    use serde_json::json;

    fn snapshot(status: SnapshotStatus, ok: &[&str], failed: &[&str]) -> NewSnapshot {
        NewSnapshot {
            data_as_of_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            status,
            source: "scraper".to_string(),
            processing_duration_ms: 4200,
            errors: failed.iter().map(|id| format!("district {id}: timeout")).collect(),
            configured_districts: Vec::new(),
            failed_districts: failed.iter().map(|s| s.to_string()).collect(),
            districts: ok
                .iter()
                .map(|id| DistrictRecord {
                    district_id: id.to_string(),
                    collected_at: "2024-01-15T06:00:00Z".parse().unwrap(),
                    data: json!({}),
                })
                .collect(),
        }
    }

    #[test]
    fn partition_derived_and_sorted() {
        let s = snapshot(SnapshotStatus::Partial, &["9", "42"], &["3"]);
        let created = "2024-01-15T07:00:00Z".parse().unwrap();
        let meta = build_metadata(&s, created);

        assert_eq!(meta.snapshot_id, "2024-01-15");
        assert_eq!(meta.successful_districts, vec!["42", "9"]);
        assert_eq!(meta.failed_districts, vec!["3"]);
        assert_eq!(meta.configured_districts, vec!["3", "42", "9"]);
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert_eq!(meta.errors.len(), 1);
        assert!(!meta.is_success());
    }

    #[test]
    fn explicit_configured_list_kept() {
        let mut s = snapshot(SnapshotStatus::Success, &["1"], &[]);
        s.configured_districts = vec!["1".into(), "1".into()];
        let meta = build_metadata(&s, Utc::now());
        assert_eq!(meta.configured_districts, vec!["1"]);
        assert!(meta.is_success());
    }

    #[test]
    fn json_field_names() {
        let s = snapshot(SnapshotStatus::Success, &["1"], &[]);
        let value = serde_json::to_value(build_metadata(&s, Utc::now())).unwrap();

        for field in [
            "snapshotId",
            "createdAt",
            "schemaVersion",
            "calculationVersion",
            "status",
            "configuredDistricts",
            "successfulDistricts",
            "failedDistricts",
            "errors",
            "processingDuration",
            "source",
            "dataAsOfDate",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["status"], "success");
        assert_eq!(value["dataAsOfDate"], "2024-01-15");
        assert_eq!(value["processingDuration"], 4200);
    }

    #[test]
    fn incompatible_major_version_rejected() {
        let s = snapshot(SnapshotStatus::Success, &["1"], &[]);
        let mut meta = build_metadata(&s, Utc::now());
        assert!(meta.check_compatibility().is_ok());

        meta.calculation_version = "2.0.0".to_string();
        match meta.check_compatibility() {
            Err(StoreError::SchemaVersionMismatch { field, found, .. }) => {
                assert_eq!(field, "calculationVersion");
                assert_eq!(found, "2.0.0");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}
