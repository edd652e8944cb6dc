//! Per-snapshot index of district files.
//!
//! The manifest is derived data: metadata stays authoritative for status.
//! It is rebuilt from the write results every time a snapshot is written.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec::district_file_name;
use super::fsio::FileStamp;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub district_id: String,
    pub file_name: String,
    pub status: EntryStatus,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotManifest {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub districts: Vec<ManifestEntry>,
    pub total_districts: usize,
    pub successful_districts: usize,
    pub failed_districts: usize,
}

impl SnapshotManifest {
    pub fn successful_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.districts
            .iter()
            .filter(|entry| entry.status == EntryStatus::Success)
    }

    pub fn entry(&self, district_id: &str) -> Option<&ManifestEntry> {
        self.districts.iter().find(|e| e.district_id == district_id)
    }

    /// Counts agree with the entry list.
    pub fn counts_consistent(&self) -> bool {
        let successful = self.successful_entries().count();
        self.districts.len() == self.total_districts
            && successful == self.successful_districts
            && self.total_districts - successful == self.failed_districts
    }
}

/// A successful entry whose file is not on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIssue {
    pub district_id: String,
    pub file_name: String,
}

/// Builds the manifest from the files the writer just renamed into place.
/// Entries are ordered by district id; a district listed as failed that was
/// also written keeps its success entry.
pub fn build_manifest(
    snapshot_id: &str,
    created_at: DateTime<Utc>,
    written: &[(String, FileStamp)],
    failed: &[String],
) -> SnapshotManifest {
    let mut entries: BTreeMap<&str, ManifestEntry> = BTreeMap::new();

    for district_id in failed {
        entries.insert(
            district_id,
            ManifestEntry {
                district_id: district_id.clone(),
                file_name: district_file_name(district_id),
                status: EntryStatus::Failed,
                file_size: 0,
                last_modified: created_at,
            },
        );
    }

    for (district_id, stamp) in written {
        entries.insert(
            district_id,
            ManifestEntry {
                district_id: district_id.clone(),
                file_name: district_file_name(district_id),
                status: EntryStatus::Success,
                file_size: stamp.size,
                last_modified: stamp.modified,
            },
        );
    }

    let districts: Vec<ManifestEntry> = entries.into_values().collect();
    let successful_districts = districts
        .iter()
        .filter(|e| e.status == EntryStatus::Success)
        .count();

    SnapshotManifest {
        snapshot_id: snapshot_id.to_string(),
        created_at,
        total_districts: districts.len(),
        successful_districts,
        failed_districts: districts.len() - successful_districts,
        districts,
    }
}

/// Successful entries whose files are missing from `dir`.
pub(crate) fn missing_files(dir: &Path, manifest: &SnapshotManifest) -> Vec<ManifestIssue> {
    manifest
        .successful_entries()
        .filter(|entry| !dir.join(&entry.file_name).is_file())
        .map(|entry| ManifestIssue {
            district_id: entry.district_id.clone(),
            file_name: entry.file_name.clone(),
        })
        .collect()
}
